//! C type-name parsing and the C primitive table.

use crate::debuginfo::{BaseEncoding, Qualifiers, TypeNamespace};
use crate::error::{FathomError, FathomResult};
use crate::platform::{Architecture, Platform};

/// The C arithmetic types the engine can synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CPrimitive
{
    Bool,
    Char,
    SignedChar,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    LongDouble,
}

impl CPrimitive
{
    /// Canonical spelling.
    pub fn name(self) -> &'static str
    {
        match self {
            CPrimitive::Bool => "_Bool",
            CPrimitive::Char => "char",
            CPrimitive::SignedChar => "signed char",
            CPrimitive::UnsignedChar => "unsigned char",
            CPrimitive::Short => "short",
            CPrimitive::UnsignedShort => "unsigned short",
            CPrimitive::Int => "int",
            CPrimitive::UnsignedInt => "unsigned int",
            CPrimitive::Long => "long",
            CPrimitive::UnsignedLong => "unsigned long",
            CPrimitive::LongLong => "long long",
            CPrimitive::UnsignedLongLong => "unsigned long long",
            CPrimitive::Float => "float",
            CPrimitive::Double => "double",
            CPrimitive::LongDouble => "long double",
        }
    }

    /// Spellings a compiler may use for this type in debug information.
    pub fn spellings(self) -> &'static [&'static str]
    {
        match self {
            CPrimitive::Bool => &["_Bool", "bool"],
            CPrimitive::Char => &["char"],
            CPrimitive::SignedChar => &["signed char"],
            CPrimitive::UnsignedChar => &["unsigned char"],
            CPrimitive::Short => &["short", "short int"],
            CPrimitive::UnsignedShort => &["unsigned short", "short unsigned int"],
            CPrimitive::Int => &["int"],
            CPrimitive::UnsignedInt => &["unsigned int"],
            CPrimitive::Long => &["long", "long int"],
            CPrimitive::UnsignedLong => &["unsigned long", "long unsigned int"],
            CPrimitive::LongLong => &["long long", "long long int"],
            CPrimitive::UnsignedLongLong => &["unsigned long long", "long long unsigned int"],
            CPrimitive::Float => &["float"],
            CPrimitive::Double => &["double"],
            CPrimitive::LongDouble => &["long double"],
        }
    }

    /// Signedness of plain `char` follows the platform ABI.
    pub fn encoding(self, platform: &Platform) -> BaseEncoding
    {
        match self {
            CPrimitive::Bool => BaseEncoding::Bool,
            CPrimitive::Char if platform.char_is_signed() => BaseEncoding::Signed,
            CPrimitive::Char => BaseEncoding::Unsigned,
            CPrimitive::SignedChar
            | CPrimitive::Short
            | CPrimitive::Int
            | CPrimitive::Long
            | CPrimitive::LongLong => BaseEncoding::Signed,
            CPrimitive::UnsignedChar
            | CPrimitive::UnsignedShort
            | CPrimitive::UnsignedInt
            | CPrimitive::UnsignedLong
            | CPrimitive::UnsignedLongLong => BaseEncoding::Unsigned,
            CPrimitive::Float | CPrimitive::Double | CPrimitive::LongDouble => BaseEncoding::Float,
        }
    }

    /// Size in bytes under the platform's data model (LP64 or ILP32).
    pub fn size(self, platform: &Platform) -> u64
    {
        match self {
            CPrimitive::Bool | CPrimitive::Char | CPrimitive::SignedChar | CPrimitive::UnsignedChar => 1,
            CPrimitive::Short | CPrimitive::UnsignedShort => 2,
            CPrimitive::Int | CPrimitive::UnsignedInt | CPrimitive::Float => 4,
            CPrimitive::Long | CPrimitive::UnsignedLong => platform.word_size() as u64,
            CPrimitive::LongLong | CPrimitive::UnsignedLongLong | CPrimitive::Double => 8,
            CPrimitive::LongDouble => match platform.architecture() {
                Architecture::I386 => 12,
                _ if platform.is_64_bit() => 16,
                _ => 8,
            },
        }
    }

    /// Integer conversion rank; floats rank above every integer.
    pub(crate) fn rank(self) -> u8
    {
        match self {
            CPrimitive::Bool => 0,
            CPrimitive::Char | CPrimitive::SignedChar | CPrimitive::UnsignedChar => 1,
            CPrimitive::Short | CPrimitive::UnsignedShort => 2,
            CPrimitive::Int | CPrimitive::UnsignedInt => 3,
            CPrimitive::Long | CPrimitive::UnsignedLong => 4,
            CPrimitive::LongLong | CPrimitive::UnsignedLongLong => 5,
            CPrimitive::Float => 6,
            CPrimitive::Double => 7,
            CPrimitive::LongDouble => 8,
        }
    }

    /// Recognize a debug-info base type name.
    pub fn from_spelling(name: &str) -> Option<Self>
    {
        match parse_type_name(name).ok()? {
            ParsedTypeName {
                base: BaseName::Primitive(primitive),
                declarators,
                ..
            } if declarators.is_empty() => Some(primitive),
            _ => None,
        }
    }
}

/// What a type name starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BaseName
{
    Void,
    Primitive(CPrimitive),
    Tagged(TypeNamespace, String),
    Identifier(String),
}

/// Pointer and array suffixes in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Declarator
{
    Pointer(Qualifiers),
    Array(Option<u64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedTypeName
{
    pub base: BaseName,
    pub qualifiers: Qualifiers,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token
{
    Word(String),
    Number(u64),
    Star,
    Open,
    Close,
}

fn tokenize(input: &str) -> FathomResult<Vec<Token>>
{
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '*' => tokens.push(Token::Star),
            '[' => tokens.push(Token::Open),
            ']' => tokens.push(Token::Close),
            c if c.is_ascii_digit() => {
                let mut end = start + c.len_utf8();
                while let Some((i, d)) = chars.peek().copied() {
                    if !d.is_ascii_alphanumeric() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Number(parse_number(&input[start..end])?));
            }
            c if c.is_alphabetic() || c == '_' || c == ':' => {
                let mut end = start + c.len_utf8();
                while let Some((i, d)) = chars.peek().copied() {
                    if !(d.is_alphanumeric() || d == '_' || d == ':') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(input[start..end].to_string()));
            }
            other => {
                return Err(FathomError::InvalidArgument(format!(
                    "unexpected character {other:?} in type name {input:?}"
                )));
            }
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> FathomResult<u64>
{
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| FathomError::InvalidArgument(format!("invalid array length {text:?}")))
}

fn qualifier(word: &str) -> Option<Qualifiers>
{
    match word {
        "const" => Some(Qualifiers::CONST),
        "volatile" => Some(Qualifiers::VOLATILE),
        "restrict" | "__restrict" => Some(Qualifiers::RESTRICT),
        "_Atomic" => Some(Qualifiers::ATOMIC),
        _ => None,
    }
}

/// Words that make up a primitive type, in any order.
#[derive(Default)]
struct PrimitiveWords
{
    signed: bool,
    unsigned: bool,
    char: bool,
    short: bool,
    int: bool,
    longs: u8,
    float: bool,
    double: bool,
    bool: bool,
    void: bool,
}

impl PrimitiveWords
{
    fn accept(&mut self, word: &str) -> bool
    {
        match word {
            "signed" | "__signed__" => self.signed = true,
            "unsigned" => self.unsigned = true,
            "char" => self.char = true,
            "short" => self.short = true,
            "int" => self.int = true,
            "long" => self.longs += 1,
            "float" => self.float = true,
            "double" => self.double = true,
            "_Bool" | "bool" => self.bool = true,
            "void" => self.void = true,
            _ => return false,
        }
        true
    }

    fn is_empty(&self) -> bool
    {
        !(self.signed
            || self.unsigned
            || self.char
            || self.short
            || self.int
            || self.longs > 0
            || self.float
            || self.double
            || self.bool
            || self.void)
    }

    fn resolve(&self, input: &str) -> FathomResult<BaseName>
    {
        let invalid = || FathomError::InvalidArgument(format!("invalid primitive type {input:?}"));
        if self.signed && self.unsigned {
            return Err(invalid());
        }
        let sign_given = self.signed || self.unsigned;
        let primitive = if self.void {
            if sign_given || self.char || self.short || self.int || self.longs > 0 || self.float || self.double || self.bool {
                return Err(invalid());
            }
            return Ok(BaseName::Void);
        } else if self.bool {
            CPrimitive::Bool
        } else if self.float {
            CPrimitive::Float
        } else if self.double {
            if sign_given || self.longs > 1 {
                return Err(invalid());
            }
            if self.longs == 1 { CPrimitive::LongDouble } else { CPrimitive::Double }
        } else if self.char {
            match (self.signed, self.unsigned) {
                (true, _) => CPrimitive::SignedChar,
                (_, true) => CPrimitive::UnsignedChar,
                _ => CPrimitive::Char,
            }
        } else if self.short {
            if self.unsigned { CPrimitive::UnsignedShort } else { CPrimitive::Short }
        } else {
            match (self.longs, self.unsigned) {
                (0, false) => CPrimitive::Int,
                (0, true) => CPrimitive::UnsignedInt,
                (1, false) => CPrimitive::Long,
                (1, true) => CPrimitive::UnsignedLong,
                (2, false) => CPrimitive::LongLong,
                (2, true) => CPrimitive::UnsignedLongLong,
                _ => return Err(invalid()),
            }
        };
        Ok(BaseName::Primitive(primitive))
    }
}

/// Parse a C-style type name such as `const struct task *[4]`.
pub(crate) fn parse_type_name(input: &str) -> FathomResult<ParsedTypeName>
{
    let tokens = tokenize(input)?;
    let mut tokens = tokens.into_iter().peekable();
    let mut qualifiers = Qualifiers::empty();
    let mut words = PrimitiveWords::default();
    let mut base: Option<BaseName> = None;

    while let Some(Token::Word(word)) = tokens.peek().cloned() {
        tokens.next();
        if let Some(q) = qualifier(&word) {
            qualifiers |= q;
            continue;
        }
        let namespace = match word.as_str() {
            "struct" => Some(TypeNamespace::Struct),
            "union" => Some(TypeNamespace::Union),
            "class" => Some(TypeNamespace::Class),
            "enum" => Some(TypeNamespace::Enum),
            _ => None,
        };
        if let Some(namespace) = namespace {
            if base.is_some() || !words.is_empty() {
                return Err(FathomError::InvalidArgument(format!("unexpected {word:?} in {input:?}")));
            }
            match tokens.next() {
                Some(Token::Word(tag)) => base = Some(BaseName::Tagged(namespace, tag)),
                _ => {
                    return Err(FathomError::InvalidArgument(format!(
                        "expected a tag name after {word:?} in {input:?}"
                    )));
                }
            }
            continue;
        }
        if base.is_none() && words.accept(&word) {
            continue;
        }
        if base.is_some() || !words.is_empty() {
            return Err(FathomError::InvalidArgument(format!("unexpected {word:?} in {input:?}")));
        }
        base = Some(BaseName::Identifier(word));
    }

    let base = match base {
        Some(base) => base,
        None if !words.is_empty() => words.resolve(input)?,
        None => return Err(FathomError::InvalidArgument(format!("missing type in {input:?}"))),
    };

    let mut declarators = Vec::new();
    let mut seen_array = false;
    while let Some(token) = tokens.next() {
        match token {
            Token::Star if !seen_array => {
                let mut pointer_qualifiers = Qualifiers::empty();
                while let Some(Token::Word(word)) = tokens.peek() {
                    let Some(q) = qualifier(word) else {
                        break;
                    };
                    pointer_qualifiers |= q;
                    tokens.next();
                }
                declarators.push(Declarator::Pointer(pointer_qualifiers));
            }
            Token::Open => {
                seen_array = true;
                let length = match tokens.next() {
                    Some(Token::Close) => None,
                    Some(Token::Number(n)) => {
                        if tokens.next() != Some(Token::Close) {
                            return Err(FathomError::InvalidArgument(format!("expected ']' in {input:?}")));
                        }
                        Some(n)
                    }
                    _ => return Err(FathomError::InvalidArgument(format!("malformed array in {input:?}"))),
                };
                declarators.push(Declarator::Array(length));
            }
            other => {
                return Err(FathomError::InvalidArgument(format!(
                    "unexpected {other:?} in type name {input:?}"
                )));
            }
        }
    }

    Ok(ParsedTypeName {
        base,
        qualifiers,
        declarators,
    })
}
