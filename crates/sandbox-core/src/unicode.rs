//! # Fixed Unicode Tables
//!
//! Character classification, case mapping, blocks and scripts behind the
//! library's `Character` and the case methods of `String`. Every answer
//! comes from the tables in this module, never from the host's locale or
//! Unicode version, so a class sees the same results on every host.
//!
//! ## Coverage
//!
//! | Area | Ranges |
//! |------|--------|
//! | Case pairs | ASCII, Latin-1, Latin Extended-A, Greek, Cyrillic, Armenian, fullwidth Latin |
//! | Categories | Latin-1 exactly; the scripts above, Hebrew, Arabic, Devanagari, Thai, CJK and Hangul letters; common punctuation, symbol and mark ranges |
//! | Blocks | the [`BLOCKS`] table |
//! | Scripts | the [`Script`] values |
//!
//! Code points outside these ranges are `UNASSIGNED`, have no case mapping,
//! belong to no block and have script `UNKNOWN`. Letters of a covered
//! script that have no case pair are reported as lowercase.

use std::cmp::Ordering;

// General categories, numbered as the platform numbers them.
pub const UNASSIGNED: i32 = 0;
pub const UPPERCASE_LETTER: i32 = 1;
pub const LOWERCASE_LETTER: i32 = 2;
pub const TITLECASE_LETTER: i32 = 3;
pub const MODIFIER_LETTER: i32 = 4;
pub const OTHER_LETTER: i32 = 5;
pub const NON_SPACING_MARK: i32 = 6;
pub const ENCLOSING_MARK: i32 = 7;
pub const COMBINING_SPACING_MARK: i32 = 8;
pub const DECIMAL_DIGIT_NUMBER: i32 = 9;
pub const LETTER_NUMBER: i32 = 10;
pub const OTHER_NUMBER: i32 = 11;
pub const SPACE_SEPARATOR: i32 = 12;
pub const LINE_SEPARATOR: i32 = 13;
pub const PARAGRAPH_SEPARATOR: i32 = 14;
pub const CONTROL: i32 = 15;
pub const FORMAT: i32 = 16;
pub const PRIVATE_USE: i32 = 18;
pub const SURROGATE: i32 = 19;
pub const DASH_PUNCTUATION: i32 = 20;
pub const START_PUNCTUATION: i32 = 21;
pub const END_PUNCTUATION: i32 = 22;
pub const CONNECTOR_PUNCTUATION: i32 = 23;
pub const OTHER_PUNCTUATION: i32 = 24;
pub const MATH_SYMBOL: i32 = 25;
pub const CURRENCY_SYMBOL: i32 = 26;
pub const MODIFIER_SYMBOL: i32 = 27;
pub const OTHER_SYMBOL: i32 = 28;
pub const INITIAL_QUOTE_PUNCTUATION: i32 = 29;
pub const FINAL_QUOTE_PUNCTUATION: i32 = 30;

/// Category constants exposed as static fields of `Character`.
pub const CATEGORY_NAMES: &[(&str, i32)] = &[
    ("UNASSIGNED", UNASSIGNED),
    ("UPPERCASE_LETTER", UPPERCASE_LETTER),
    ("LOWERCASE_LETTER", LOWERCASE_LETTER),
    ("TITLECASE_LETTER", TITLECASE_LETTER),
    ("MODIFIER_LETTER", MODIFIER_LETTER),
    ("OTHER_LETTER", OTHER_LETTER),
    ("NON_SPACING_MARK", NON_SPACING_MARK),
    ("ENCLOSING_MARK", ENCLOSING_MARK),
    ("COMBINING_SPACING_MARK", COMBINING_SPACING_MARK),
    ("DECIMAL_DIGIT_NUMBER", DECIMAL_DIGIT_NUMBER),
    ("LETTER_NUMBER", LETTER_NUMBER),
    ("OTHER_NUMBER", OTHER_NUMBER),
    ("SPACE_SEPARATOR", SPACE_SEPARATOR),
    ("LINE_SEPARATOR", LINE_SEPARATOR),
    ("PARAGRAPH_SEPARATOR", PARAGRAPH_SEPARATOR),
    ("CONTROL", CONTROL),
    ("FORMAT", FORMAT),
    ("PRIVATE_USE", PRIVATE_USE),
    ("SURROGATE", SURROGATE),
    ("DASH_PUNCTUATION", DASH_PUNCTUATION),
    ("START_PUNCTUATION", START_PUNCTUATION),
    ("END_PUNCTUATION", END_PUNCTUATION),
    ("CONNECTOR_PUNCTUATION", CONNECTOR_PUNCTUATION),
    ("OTHER_PUNCTUATION", OTHER_PUNCTUATION),
    ("MATH_SYMBOL", MATH_SYMBOL),
    ("CURRENCY_SYMBOL", CURRENCY_SYMBOL),
    ("MODIFIER_SYMBOL", MODIFIER_SYMBOL),
    ("OTHER_SYMBOL", OTHER_SYMBOL),
    ("INITIAL_QUOTE_PUNCTUATION", INITIAL_QUOTE_PUNCTUATION),
    ("FINAL_QUOTE_PUNCTUATION", FINAL_QUOTE_PUNCTUATION),
];

pub const MAX_CODE_POINT: i32 = 0x10FFFF;
pub const MIN_RADIX: i32 = 2;
pub const MAX_RADIX: i32 = 36;

/// Code point of `value`, if it is one.
pub fn code_point(value: i32) -> Option<u32> {
    u32::try_from(value).ok().filter(|c| *c <= MAX_CODE_POINT as u32)
}

// =============================================================================
// Case Mapping
// =============================================================================

/// Simple lowercase partner of an uppercase letter.
fn lower_of(c: u32) -> Option<u32> {
    let lower = match c {
        0x0041..=0x005A | 0x00C0..=0x00D6 | 0x00D8..=0x00DE => c + 32,
        0x0100..=0x012F | 0x0132..=0x0137 | 0x014A..=0x0177 if c % 2 == 0 => c + 1,
        0x0139..=0x0148 | 0x0179..=0x017E if c % 2 == 1 => c + 1,
        0x0130 => 0x0069,
        0x0178 => 0x00FF,
        0x0386 => 0x03AC,
        0x0388..=0x038A => c + 37,
        0x038C => 0x03CC,
        0x038E..=0x038F => c + 63,
        0x0391..=0x03A1 | 0x03A3..=0x03AB => c + 32,
        0x0400..=0x040F => c + 80,
        0x0410..=0x042F => c + 32,
        0x0460..=0x0481 | 0x048A..=0x04BF if c % 2 == 0 => c + 1,
        0x0531..=0x0556 => c + 48,
        0xFF21..=0xFF3A => c + 32,
        _ => return None,
    };
    Some(lower)
}

/// Simple uppercase partner of a lowercase letter.
fn upper_of(c: u32) -> Option<u32> {
    let upper = match c {
        0x0061..=0x007A | 0x00E0..=0x00F6 | 0x00F8..=0x00FE => c - 32,
        0x00B5 => 0x039C,
        0x00FF => 0x0178,
        0x0101..=0x012F | 0x0133..=0x0137 | 0x014B..=0x0177 if c % 2 == 1 => c - 1,
        0x013A..=0x0148 | 0x017A..=0x017E if c % 2 == 0 => c - 1,
        0x0131 => 0x0049,
        0x017F => 0x0053,
        0x03AC => 0x0386,
        0x03AD..=0x03AF => c - 37,
        0x03CC => 0x038C,
        0x03CD..=0x03CE => c - 63,
        0x03B1..=0x03C1 | 0x03C3..=0x03CB => c - 32,
        0x03C2 => 0x03A3,
        0x0430..=0x044F => c - 32,
        0x0450..=0x045F => c - 80,
        0x0461..=0x0481 | 0x048B..=0x04BF if c % 2 == 1 => c - 1,
        0x0561..=0x0586 => c - 48,
        0xFF41..=0xFF5A => c - 32,
        _ => return None,
    };
    Some(upper)
}

pub fn to_upper(c: u32) -> u32 {
    upper_of(c).unwrap_or(c)
}

pub fn to_lower(c: u32) -> u32 {
    lower_of(c).unwrap_or(c)
}

fn is_cased(c: u32) -> bool {
    matches!(category(c), UPPERCASE_LETTER | LOWERCASE_LETTER | TITLECASE_LETTER)
}

fn push_code_point(out: &mut String, c: u32) {
    out.push(char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER));
}

/// `String.toUpperCase`: simple mappings plus `ß` to `SS`.
pub fn upper_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{DF}' => out.push_str("SS"),
            _ => push_code_point(&mut out, to_upper(c as u32)),
        }
    }
    out
}

/// `String.toLowerCase`: simple mappings, `İ` to `i̇` and a word-final
/// capital sigma to `ς`.
pub fn lower_case(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, c) in chars.iter().enumerate() {
        match *c {
            '\u{130}' => out.push_str("i\u{307}"),
            '\u{3A3}' => {
                let after_cased = i > 0 && is_cased(chars[i - 1] as u32);
                let before_cased = chars.get(i + 1).is_some_and(|next| is_cased(*next as u32));
                out.push(if after_cased && !before_cased { '\u{3C2}' } else { '\u{3C3}' });
            }
            other => push_code_point(&mut out, to_lower(other as u32)),
        }
    }
    out
}

/// `String.compareToIgnoreCase` over UTF-16 units: units are folded to
/// upper case and then to lower case before comparing.
pub fn compare_ignore_case(left: &[u16], right: &[u16]) -> i32 {
    for (a, b) in left.iter().zip(right) {
        if a == b {
            continue;
        }
        let (upper_a, upper_b) = (to_upper(u32::from(*a)), to_upper(u32::from(*b)));
        if upper_a == upper_b {
            continue;
        }
        let (lower_a, lower_b) = (to_lower(upper_a), to_lower(upper_b));
        if lower_a != lower_b {
            return lower_a as i32 - lower_b as i32;
        }
    }
    left.len() as i32 - right.len() as i32
}

// =============================================================================
// Categories
// =============================================================================

/// General category of `c`.
pub fn category(c: u32) -> i32 {
    if lower_of(c).is_some() {
        return UPPERCASE_LETTER;
    }
    if upper_of(c).is_some() {
        return LOWERCASE_LETTER;
    }
    match c {
        0x0000..=0x001F | 0x007F..=0x009F => CONTROL,
        0x0020 | 0x00A0 => SPACE_SEPARATOR,
        0x0024 | 0x00A2..=0x00A5 => CURRENCY_SYMBOL,
        0x0028 | 0x005B | 0x007B => START_PUNCTUATION,
        0x0029 | 0x005D | 0x007D => END_PUNCTUATION,
        0x002B | 0x003C..=0x003E | 0x007C | 0x007E | 0x00AC | 0x00B1 | 0x00D7 | 0x00F7 => MATH_SYMBOL,
        0x002D => DASH_PUNCTUATION,
        0x0030..=0x0039 => DECIMAL_DIGIT_NUMBER,
        0x005E | 0x0060 | 0x00A8 | 0x00AF | 0x00B4 | 0x00B8 => MODIFIER_SYMBOL,
        0x005F => CONNECTOR_PUNCTUATION,
        0x0021..=0x002F | 0x003A..=0x0040 | 0x005C => OTHER_PUNCTUATION,
        0x00A1 | 0x00A7 | 0x00B6 | 0x00B7 | 0x00BF => OTHER_PUNCTUATION,
        0x00A6 | 0x00A9 | 0x00AE | 0x00B0 => OTHER_SYMBOL,
        0x00AA | 0x00BA => OTHER_LETTER,
        0x00AB => INITIAL_QUOTE_PUNCTUATION,
        0x00BB => FINAL_QUOTE_PUNCTUATION,
        0x00AD => FORMAT,
        0x00B2 | 0x00B3 | 0x00B9 | 0x00BC..=0x00BE => OTHER_NUMBER,
        0x00DF | 0x0138 | 0x0149 => LOWERCASE_LETTER,
        0x0180..=0x02AF => LOWERCASE_LETTER,
        0x02B0..=0x02C1 | 0x02C6..=0x02D1 | 0x02E0..=0x02E4 | 0x02EC | 0x02EE => MODIFIER_LETTER,
        0x02C2..=0x02C5 | 0x02D2..=0x02DF | 0x02E5..=0x02EB | 0x02ED | 0x02EF..=0x02FF => MODIFIER_SYMBOL,
        0x0300..=0x036F => NON_SPACING_MARK,
        0x0375 | 0x0384 | 0x0385 => MODIFIER_SYMBOL,
        0x037E | 0x0387 => OTHER_PUNCTUATION,
        0x0378 | 0x0379 | 0x0380..=0x0383 | 0x038B | 0x038D | 0x03A2 => UNASSIGNED,
        0x0370..=0x03FF => LOWERCASE_LETTER,
        0x0482 => OTHER_SYMBOL,
        0x0483..=0x0487 => NON_SPACING_MARK,
        0x0488..=0x0489 => ENCLOSING_MARK,
        0x0400..=0x052F => LOWERCASE_LETTER,
        0x0559 => MODIFIER_LETTER,
        0x055A..=0x055F | 0x0589 => OTHER_PUNCTUATION,
        0x0587 => LOWERCASE_LETTER,
        0x0591..=0x05BD | 0x05BF | 0x05C1 | 0x05C2 | 0x05C4 | 0x05C5 | 0x05C7 => NON_SPACING_MARK,
        0x05BE => DASH_PUNCTUATION,
        0x05C0 | 0x05C3 | 0x05C6 | 0x05F3 | 0x05F4 => OTHER_PUNCTUATION,
        0x05D0..=0x05EA | 0x05F0..=0x05F2 => OTHER_LETTER,
        0x060C | 0x061B | 0x061F | 0x066A..=0x066D => OTHER_PUNCTUATION,
        0x0620..=0x063F | 0x0641..=0x064A | 0x066E | 0x066F | 0x0671..=0x06D3 => OTHER_LETTER,
        0x0640 => MODIFIER_LETTER,
        0x064B..=0x065F | 0x0670 => NON_SPACING_MARK,
        0x0660..=0x0669 | 0x06F0..=0x06F9 => DECIMAL_DIGIT_NUMBER,
        0x0904..=0x0939 | 0x093D | 0x0950 | 0x0958..=0x0961 => OTHER_LETTER,
        0x0900..=0x0902 | 0x093A | 0x093C | 0x0941..=0x0948 | 0x094D | 0x0951..=0x0957 | 0x0962 | 0x0963 => {
            NON_SPACING_MARK
        }
        0x0903 | 0x093B | 0x093E..=0x0940 | 0x0949..=0x094C | 0x094E | 0x094F => COMBINING_SPACING_MARK,
        0x0964 | 0x0965 | 0x0970 => OTHER_PUNCTUATION,
        0x0966..=0x096F => DECIMAL_DIGIT_NUMBER,
        0x0E01..=0x0E30 | 0x0E32 | 0x0E33 | 0x0E40..=0x0E45 => OTHER_LETTER,
        0x0E31 | 0x0E34..=0x0E3A | 0x0E47..=0x0E4E => NON_SPACING_MARK,
        0x0E3F => CURRENCY_SYMBOL,
        0x0E46 => MODIFIER_LETTER,
        0x0E4F | 0x0E5A | 0x0E5B => OTHER_PUNCTUATION,
        0x0E50..=0x0E59 => DECIMAL_DIGIT_NUMBER,
        0x2000..=0x200A | 0x202F | 0x205F => SPACE_SEPARATOR,
        0x200B..=0x200F | 0x202A..=0x202E | 0x2060..=0x2064 => FORMAT,
        0x2010..=0x2015 => DASH_PUNCTUATION,
        0x2018 | 0x201B | 0x201C | 0x201F | 0x2039 => INITIAL_QUOTE_PUNCTUATION,
        0x2019 | 0x201D | 0x203A => FINAL_QUOTE_PUNCTUATION,
        0x201A | 0x201E | 0x2045 => START_PUNCTUATION,
        0x2046 => END_PUNCTUATION,
        0x2028 => LINE_SEPARATOR,
        0x2029 => PARAGRAPH_SEPARATOR,
        0x203F | 0x2040 | 0x2054 => CONNECTOR_PUNCTUATION,
        0x2044 | 0x2052 => MATH_SYMBOL,
        0x2016 | 0x2017 | 0x2020..=0x2027 | 0x2030..=0x205E => OTHER_PUNCTUATION,
        0x20A0..=0x20C0 => CURRENCY_SYMBOL,
        0x2190..=0x2194 | 0x219A | 0x219B | 0x21A0 | 0x21A3 | 0x21A6 | 0x21AE | 0x21CE | 0x21CF | 0x21D2 | 0x21D4 => {
            MATH_SYMBOL
        }
        0x21F4..=0x22FF => MATH_SYMBOL,
        0x2195..=0x21F3 | 0x2500..=0x257F => OTHER_SYMBOL,
        0x3000 => SPACE_SEPARATOR,
        0x3001..=0x3003 | 0x303D => OTHER_PUNCTUATION,
        0x3004 | 0x3012 | 0x3013 | 0x3020 | 0x3036 | 0x3037 | 0x303E | 0x303F => OTHER_SYMBOL,
        0x3005 | 0x3031..=0x3035 | 0x303B | 0x309D | 0x309E | 0x30FC..=0x30FE | 0xFF70 | 0xFF9E | 0xFF9F => {
            MODIFIER_LETTER
        }
        0x3006 | 0x303C => OTHER_LETTER,
        0x3007 | 0x3021..=0x3029 | 0x3038..=0x303A => LETTER_NUMBER,
        0x3008..=0x3011 | 0x3014..=0x301B if c % 2 == 0 => START_PUNCTUATION,
        0x3008..=0x3011 | 0x3014..=0x301B => END_PUNCTUATION,
        0x301C | 0x3030 | 0x30A0 => DASH_PUNCTUATION,
        0x301D => START_PUNCTUATION,
        0x301E | 0x301F => END_PUNCTUATION,
        0x302A..=0x302D | 0x3099 | 0x309A => NON_SPACING_MARK,
        0x302E | 0x302F => COMBINING_SPACING_MARK,
        0x309B | 0x309C => MODIFIER_SYMBOL,
        0x30FB => OTHER_PUNCTUATION,
        0x3041..=0x3096 | 0x309F | 0x30A1..=0x30FA | 0x30FF => OTHER_LETTER,
        0x4E00..=0x9FFF | 0xAC00..=0xD7A3 | 0xFF66..=0xFF9D => OTHER_LETTER,
        0xD800..=0xDFFF => SURROGATE,
        0xE000..=0xF8FF | 0xF0000..=0xFFFFD | 0x100000..=0x10FFFD => PRIVATE_USE,
        0xFEFF | 0xFFF9..=0xFFFB => FORMAT,
        0xFF04 => CURRENCY_SYMBOL,
        0xFF08 | 0xFF3B | 0xFF5B | 0xFF5F | 0xFF62 => START_PUNCTUATION,
        0xFF09 | 0xFF3D | 0xFF5D | 0xFF60 | 0xFF63 => END_PUNCTUATION,
        0xFF0B | 0xFF1C..=0xFF1E | 0xFF5C | 0xFF5E => MATH_SYMBOL,
        0xFF0D => DASH_PUNCTUATION,
        0xFF10..=0xFF19 => DECIMAL_DIGIT_NUMBER,
        0xFF3E | 0xFF40 => MODIFIER_SYMBOL,
        0xFF3F => CONNECTOR_PUNCTUATION,
        0xFF01..=0xFF20 | 0xFF61 | 0xFF64 | 0xFF65 => OTHER_PUNCTUATION,
        0xFFFC | 0xFFFD => OTHER_SYMBOL,
        _ => UNASSIGNED,
    }
}

pub fn is_letter(c: u32) -> bool {
    (UPPERCASE_LETTER..=OTHER_LETTER).contains(&category(c))
}

pub fn is_digit(c: u32) -> bool {
    category(c) == DECIMAL_DIGIT_NUMBER
}

pub fn is_letter_or_digit(c: u32) -> bool {
    is_letter(c) || is_digit(c)
}

pub fn is_alphabetic(c: u32) -> bool {
    is_letter(c) || category(c) == LETTER_NUMBER
}

pub fn is_upper_case(c: u32) -> bool {
    category(c) == UPPERCASE_LETTER
}

/// Lowercase letters plus the modifier letters the platform also counts.
pub fn is_lower_case(c: u32) -> bool {
    category(c) == LOWERCASE_LETTER
        || matches!(c, 0x00AA | 0x00BA | 0x02B0..=0x02B8 | 0x02C0 | 0x02C1 | 0x02E0..=0x02E4)
}

pub fn is_space_char(c: u32) -> bool {
    matches!(category(c), SPACE_SEPARATOR | LINE_SEPARATOR | PARAGRAPH_SEPARATOR)
}

/// Separators other than the no-break spaces, plus the ASCII layout
/// controls.
pub fn is_whitespace(c: u32) -> bool {
    match c {
        0x0009..=0x000D | 0x001C..=0x001F => true,
        0x00A0 | 0x2007 | 0x202F => false,
        _ => is_space_char(c),
    }
}

// =============================================================================
// Digits
// =============================================================================

/// First code point of each run of ten decimal digits.
const DECIMAL_ZEROS: &[u32] = &[0x0030, 0x0660, 0x06F0, 0x0966, 0x0E50, 0xFF10];

fn decimal_value(c: u32) -> Option<u32> {
    DECIMAL_ZEROS
        .iter()
        .find(|zero| (**zero..**zero + 10).contains(&c))
        .map(|zero| c - zero)
}

/// Value of a Latin letter used as a digit above nine.
fn letter_value(c: u32) -> Option<u32> {
    match c {
        0x0041..=0x005A => Some(c - 0x0041 + 10),
        0x0061..=0x007A => Some(c - 0x0061 + 10),
        0xFF21..=0xFF3A => Some(c - 0xFF21 + 10),
        0xFF41..=0xFF5A => Some(c - 0xFF41 + 10),
        _ => None,
    }
}

/// `Character.digit`: the value of `c` in `radix`, or -1.
pub fn digit(c: u32, radix: i32) -> i32 {
    if !(MIN_RADIX..=MAX_RADIX).contains(&radix) {
        return -1;
    }
    match decimal_value(c).or_else(|| letter_value(c)) {
        Some(value) if (value as i32) < radix => value as i32,
        _ => -1,
    }
}

/// `Character.forDigit`: lowercase digit character, or 0.
pub fn for_digit(value: i32, radix: i32) -> u32 {
    if !(MIN_RADIX..=MAX_RADIX).contains(&radix) || !(0..radix).contains(&value) {
        return 0;
    }
    if value < 10 {
        0x30 + value as u32
    } else {
        0x61 + value as u32 - 10
    }
}

/// `Character.getNumericValue`: -1 without a value, -2 for fractions.
pub fn numeric_value(c: u32) -> i32 {
    if let Some(value) = decimal_value(c).or_else(|| letter_value(c)) {
        return value as i32;
    }
    match c {
        0x00B2 => 2,
        0x00B3 => 3,
        0x00B9 => 1,
        0x00BC..=0x00BE => -2,
        0x3007 => 0,
        0x3021..=0x3029 => (c - 0x3020) as i32,
        _ => -1,
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// A named contiguous range of code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub name: &'static str,
    pub first: u32,
    pub last: u32,
}

const fn block(name: &'static str, first: u32, last: u32) -> Block {
    Block { name, first, last }
}

/// Known blocks, sorted and disjoint.
pub const BLOCKS: &[Block] = &[
    block("BASIC_LATIN", 0x0000, 0x007F),
    block("LATIN_1_SUPPLEMENT", 0x0080, 0x00FF),
    block("LATIN_EXTENDED_A", 0x0100, 0x017F),
    block("LATIN_EXTENDED_B", 0x0180, 0x024F),
    block("IPA_EXTENSIONS", 0x0250, 0x02AF),
    block("SPACING_MODIFIER_LETTERS", 0x02B0, 0x02FF),
    block("COMBINING_DIACRITICAL_MARKS", 0x0300, 0x036F),
    block("GREEK", 0x0370, 0x03FF),
    block("CYRILLIC", 0x0400, 0x04FF),
    block("CYRILLIC_SUPPLEMENTARY", 0x0500, 0x052F),
    block("ARMENIAN", 0x0530, 0x058F),
    block("HEBREW", 0x0590, 0x05FF),
    block("ARABIC", 0x0600, 0x06FF),
    block("DEVANAGARI", 0x0900, 0x097F),
    block("THAI", 0x0E00, 0x0E7F),
    block("GENERAL_PUNCTUATION", 0x2000, 0x206F),
    block("CURRENCY_SYMBOLS", 0x20A0, 0x20CF),
    block("ARROWS", 0x2190, 0x21FF),
    block("MATHEMATICAL_OPERATORS", 0x2200, 0x22FF),
    block("BOX_DRAWING", 0x2500, 0x257F),
    block("CJK_SYMBOLS_AND_PUNCTUATION", 0x3000, 0x303F),
    block("HIRAGANA", 0x3040, 0x309F),
    block("KATAKANA", 0x30A0, 0x30FF),
    block("CJK_UNIFIED_IDEOGRAPHS", 0x4E00, 0x9FFF),
    block("HANGUL_SYLLABLES", 0xAC00, 0xD7AF),
    block("HIGH_SURROGATES", 0xD800, 0xDB7F),
    block("HIGH_PRIVATE_USE_SURROGATES", 0xDB80, 0xDBFF),
    block("LOW_SURROGATES", 0xDC00, 0xDFFF),
    block("PRIVATE_USE_AREA", 0xE000, 0xF8FF),
    block("HALFWIDTH_AND_FULLWIDTH_FORMS", 0xFF00, 0xFFEF),
    block("SPECIALS", 0xFFF0, 0xFFFF),
];

fn find_range<T>(table: &[T], c: u32, bounds: impl Fn(&T) -> (u32, u32)) -> Option<&T> {
    table
        .binary_search_by(|entry| {
            let (first, last) = bounds(entry);
            if last < c {
                Ordering::Less
            } else if first > c {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        })
        .ok()
        .map(|index| &table[index])
}

pub fn block_of(c: u32) -> Option<&'static Block> {
    find_range(BLOCKS, c, |b| (b.first, b.last))
}

/// Block by its constant name, ignoring case, spaces and underscores.
pub fn block_named(name: &str) -> Option<&'static Block> {
    let wanted: String = name
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .flat_map(char::to_uppercase)
        .collect();
    BLOCKS.iter().find(|b| b.name.replace('_', "") == wanted)
}

// =============================================================================
// Scripts
// =============================================================================

/// Scripts in declaration order; the ordinal is the enum ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Common,
    Latin,
    Greek,
    Cyrillic,
    Armenian,
    Hebrew,
    Arabic,
    Devanagari,
    Thai,
    Hiragana,
    Katakana,
    Han,
    Hangul,
    Inherited,
    Unknown,
}

impl Script {
    pub const ALL: [Script; 15] = [
        Script::Common,
        Script::Latin,
        Script::Greek,
        Script::Cyrillic,
        Script::Armenian,
        Script::Hebrew,
        Script::Arabic,
        Script::Devanagari,
        Script::Thai,
        Script::Hiragana,
        Script::Katakana,
        Script::Han,
        Script::Hangul,
        Script::Inherited,
        Script::Unknown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Script::Common => "COMMON",
            Script::Latin => "LATIN",
            Script::Greek => "GREEK",
            Script::Cyrillic => "CYRILLIC",
            Script::Armenian => "ARMENIAN",
            Script::Hebrew => "HEBREW",
            Script::Arabic => "ARABIC",
            Script::Devanagari => "DEVANAGARI",
            Script::Thai => "THAI",
            Script::Hiragana => "HIRAGANA",
            Script::Katakana => "KATAKANA",
            Script::Han => "HAN",
            Script::Hangul => "HANGUL",
            Script::Inherited => "INHERITED",
            Script::Unknown => "UNKNOWN",
        }
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn named(name: &str) -> Option<Script> {
        let wanted = name.to_ascii_uppercase();
        Script::ALL.into_iter().find(|s| s.name() == wanted)
    }
}

/// `(first, last, script)`, sorted and disjoint.
const SCRIPT_RANGES: &[(u32, u32, Script)] = &[
    (0x0000, 0x0040, Script::Common),
    (0x0041, 0x005A, Script::Latin),
    (0x005B, 0x0060, Script::Common),
    (0x0061, 0x007A, Script::Latin),
    (0x007B, 0x00A9, Script::Common),
    (0x00AA, 0x00AA, Script::Latin),
    (0x00AB, 0x00B9, Script::Common),
    (0x00BA, 0x00BA, Script::Latin),
    (0x00BB, 0x00BF, Script::Common),
    (0x00C0, 0x00D6, Script::Latin),
    (0x00D7, 0x00D7, Script::Common),
    (0x00D8, 0x00F6, Script::Latin),
    (0x00F7, 0x00F7, Script::Common),
    (0x00F8, 0x02B8, Script::Latin),
    (0x02B9, 0x02DF, Script::Common),
    (0x02E0, 0x02E4, Script::Latin),
    (0x02E5, 0x02FF, Script::Common),
    (0x0300, 0x036F, Script::Inherited),
    (0x0370, 0x0373, Script::Greek),
    (0x0374, 0x0374, Script::Common),
    (0x0375, 0x037D, Script::Greek),
    (0x037E, 0x037E, Script::Common),
    (0x037F, 0x0384, Script::Greek),
    (0x0385, 0x0385, Script::Common),
    (0x0386, 0x0386, Script::Greek),
    (0x0387, 0x0387, Script::Common),
    (0x0388, 0x03FF, Script::Greek),
    (0x0400, 0x0484, Script::Cyrillic),
    (0x0485, 0x0486, Script::Inherited),
    (0x0487, 0x052F, Script::Cyrillic),
    (0x0531, 0x0588, Script::Armenian),
    (0x0589, 0x0589, Script::Common),
    (0x058A, 0x058F, Script::Armenian),
    (0x0591, 0x05F4, Script::Hebrew),
    (0x0600, 0x060B, Script::Arabic),
    (0x060C, 0x060C, Script::Common),
    (0x060D, 0x061A, Script::Arabic),
    (0x061B, 0x061B, Script::Common),
    (0x061C, 0x061E, Script::Arabic),
    (0x061F, 0x061F, Script::Common),
    (0x0620, 0x063F, Script::Arabic),
    (0x0640, 0x0640, Script::Common),
    (0x0641, 0x064A, Script::Arabic),
    (0x064B, 0x0655, Script::Inherited),
    (0x0656, 0x066F, Script::Arabic),
    (0x0670, 0x0670, Script::Inherited),
    (0x0671, 0x06FF, Script::Arabic),
    (0x0900, 0x0950, Script::Devanagari),
    (0x0951, 0x0954, Script::Inherited),
    (0x0955, 0x0963, Script::Devanagari),
    (0x0964, 0x0965, Script::Common),
    (0x0966, 0x097F, Script::Devanagari),
    (0x0E01, 0x0E3A, Script::Thai),
    (0x0E3F, 0x0E3F, Script::Common),
    (0x0E40, 0x0E5B, Script::Thai),
    (0x2000, 0x200B, Script::Common),
    (0x200C, 0x200D, Script::Inherited),
    (0x200E, 0x2064, Script::Common),
    (0x20A0, 0x20C0, Script::Common),
    (0x2190, 0x22FF, Script::Common),
    (0x2500, 0x257F, Script::Common),
    (0x3000, 0x3004, Script::Common),
    (0x3005, 0x3005, Script::Han),
    (0x3006, 0x3006, Script::Common),
    (0x3007, 0x3007, Script::Han),
    (0x3008, 0x3020, Script::Common),
    (0x3021, 0x3029, Script::Han),
    (0x302A, 0x302D, Script::Inherited),
    (0x302E, 0x302F, Script::Hangul),
    (0x3030, 0x3037, Script::Common),
    (0x3038, 0x303B, Script::Han),
    (0x303C, 0x303F, Script::Common),
    (0x3041, 0x3096, Script::Hiragana),
    (0x3099, 0x309A, Script::Inherited),
    (0x309B, 0x309C, Script::Common),
    (0x309D, 0x309F, Script::Hiragana),
    (0x30A0, 0x30A0, Script::Common),
    (0x30A1, 0x30FA, Script::Katakana),
    (0x30FB, 0x30FC, Script::Common),
    (0x30FD, 0x30FF, Script::Katakana),
    (0x4E00, 0x9FFF, Script::Han),
    (0xAC00, 0xD7A3, Script::Hangul),
    (0xFEFF, 0xFEFF, Script::Common),
    (0xFF01, 0xFF20, Script::Common),
    (0xFF21, 0xFF3A, Script::Latin),
    (0xFF3B, 0xFF40, Script::Common),
    (0xFF41, 0xFF5A, Script::Latin),
    (0xFF5B, 0xFF65, Script::Common),
    (0xFF66, 0xFF6F, Script::Katakana),
    (0xFF70, 0xFF70, Script::Common),
    (0xFF71, 0xFF9D, Script::Katakana),
    (0xFF9E, 0xFF9F, Script::Common),
    (0xFFF9, 0xFFFD, Script::Common),
];

pub fn script_of(c: u32) -> Script {
    find_range(SCRIPT_RANGES, c, |(first, last, _)| (*first, *last))
        .map_or(Script::Unknown, |(_, _, script)| *script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(text: &str) -> Vec<u16> {
        text.encode_utf16().collect()
    }

    #[test]
    fn test_tables_are_sorted_and_disjoint() {
        assert!(BLOCKS.windows(2).all(|w| w[0].last < w[1].first));
        assert!(BLOCKS.iter().all(|b| b.first <= b.last));
        assert!(SCRIPT_RANGES.windows(2).all(|w| w[0].1 < w[1].0));
        assert!(SCRIPT_RANGES.iter().all(|(first, last, _)| first <= last));
        assert!(DECIMAL_ZEROS.iter().all(|zero| is_digit(*zero) && is_digit(zero + 9)));
    }

    #[test]
    fn test_case_pairs_round_trip() {
        // Dotted capital I lowers to a plain `i`, which uppercases to `I`.
        for c in (0x0000..0x0600).chain(0xFF00..0xFF60).filter(|c| *c != 0x0130) {
            if let Some(lower) = lower_of(c) {
                assert_eq!(upper_of(lower), Some(c), "pair of {:#x}", c);
            }
        }
        assert_eq!(to_upper('é' as u32), 'É' as u32);
        assert_eq!(to_lower('Ж' as u32), 'ж' as u32);
        assert_eq!(to_upper('ς' as u32), 'Σ' as u32);
        assert_eq!(to_upper('ÿ' as u32), 0x0178);
        assert_eq!(to_lower('İ' as u32), 'i' as u32);
        assert_eq!(to_upper('ı' as u32), 'I' as u32);
        assert_eq!(to_upper('中' as u32), '中' as u32);
    }

    #[test]
    fn test_string_case_conversion() {
        assert_eq!(upper_case("straße"), "STRASSE");
        assert_eq!(upper_case("Привет, мир"), "ПРИВЕТ, МИР");
        assert_eq!(lower_case("ΟΔΟΣ ΟΔΟΣ"), "\u{3BF}\u{3B4}\u{3BF}\u{3C2} \u{3BF}\u{3B4}\u{3BF}\u{3C2}");
        assert_eq!(lower_case("Σ"), "σ");
        assert_eq!(lower_case("İstanbul"), "i\u{307}stanbul");
        assert_eq!(lower_case("MiXeD 123"), "mixed 123");
    }

    #[test]
    fn test_compare_ignore_case() {
        assert_eq!(compare_ignore_case(&units("Apple"), &units("apple")), 0);
        assert!(compare_ignore_case(&units("apple"), &units("Banana")) < 0);
        assert!(compare_ignore_case(&units("pear"), &units("Cherry")) > 0);
        assert!(compare_ignore_case(&units("app"), &units("APPLE")) < 0);
        assert_eq!(compare_ignore_case(&units("ΣΟΦΙΑ"), &units("σοφια")), 0);
    }

    #[test]
    fn test_categories() {
        assert_eq!(category('A' as u32), UPPERCASE_LETTER);
        assert_eq!(category('ß' as u32), LOWERCASE_LETTER);
        assert_eq!(category('5' as u32), DECIMAL_DIGIT_NUMBER);
        assert_eq!(category(' ' as u32), SPACE_SEPARATOR);
        assert_eq!(category('$' as u32), CURRENCY_SYMBOL);
        assert_eq!(category('€' as u32), CURRENCY_SYMBOL);
        assert_eq!(category('(' as u32), START_PUNCTUATION);
        assert_eq!(category('«' as u32), INITIAL_QUOTE_PUNCTUATION);
        assert_eq!(category(0x0301), NON_SPACING_MARK);
        assert_eq!(category('中' as u32), OTHER_LETTER);
        assert_eq!(category('א' as u32), OTHER_LETTER);
        assert_eq!(category(0xD800), SURROGATE);
        assert_eq!(category(0xE000), PRIVATE_USE);
        assert_eq!(category(0x1F600), UNASSIGNED);
        assert!(is_letter('Ω' as u32));
        assert!(is_digit('٣' as u32));
        assert!(!is_letter_or_digit('-' as u32));
        assert!(is_alphabetic(0x3007));
        assert!(is_lower_case(0x00AA));
        assert!(is_upper_case('Ж' as u32));
    }

    #[test]
    fn test_whitespace_excludes_no_break_spaces() {
        for c in [0x09, 0x0A, 0x0D, 0x1C, 0x20, 0x2003, 0x2028, 0x3000] {
            assert!(is_whitespace(c), "{:#x}", c);
        }
        for c in [0x00A0, 0x2007, 0x202F, 'a' as u32] {
            assert!(!is_whitespace(c), "{:#x}", c);
        }
        assert!(is_space_char(0x00A0));
        assert!(!is_space_char(0x09));
    }

    #[test]
    fn test_digits() {
        assert_eq!(digit('7' as u32, 10), 7);
        assert_eq!(digit('f' as u32, 16), 15);
        assert_eq!(digit('F' as u32, 16), 15);
        assert_eq!(digit('g' as u32, 16), -1);
        assert_eq!(digit('٣' as u32, 10), 3);
        assert_eq!(digit('1' as u32, 1), -1);
        assert_eq!(for_digit(11, 16), 'b' as u32);
        assert_eq!(for_digit(16, 16), 0);
        assert_eq!(numeric_value('z' as u32), 35);
        assert_eq!(numeric_value('½' as u32), -2);
        assert_eq!(numeric_value('²' as u32), 2);
        assert_eq!(numeric_value('!' as u32), -1);
    }

    #[test]
    fn test_blocks_and_scripts() {
        assert_eq!(block_of('a' as u32).map(|b| b.name), Some("BASIC_LATIN"));
        assert_eq!(block_of('Ж' as u32).map(|b| b.name), Some("CYRILLIC"));
        assert_eq!(block_of('中' as u32).map(|b| b.name), Some("CJK_UNIFIED_IDEOGRAPHS"));
        assert_eq!(block_of(0x0800), None);
        assert_eq!(block_named("Basic Latin").map(|b| b.first), Some(0));
        assert_eq!(block_named("greek").map(|b| b.first), Some(0x0370));
        assert_eq!(block_named("Klingon"), None);

        assert_eq!(script_of('a' as u32), Script::Latin);
        assert_eq!(script_of('7' as u32), Script::Common);
        assert_eq!(script_of('Ω' as u32), Script::Greek);
        assert_eq!(script_of('中' as u32), Script::Han);
        assert_eq!(script_of('か' as u32), Script::Hiragana);
        assert_eq!(script_of(0x0301), Script::Inherited);
        assert_eq!(script_of(0x1F600), Script::Unknown);
        assert_eq!(Script::named("han"), Some(Script::Han));
        assert_eq!(Script::Unknown.ordinal(), Script::ALL.len() as i32 - 1);
    }

    #[test]
    fn test_code_point_bounds() {
        assert_eq!(code_point(0x41), Some(0x41));
        assert_eq!(code_point(MAX_CODE_POINT), Some(0x10FFFF));
        assert_eq!(code_point(MAX_CODE_POINT + 1), None);
        assert_eq!(code_point(-1), None);
    }
}
