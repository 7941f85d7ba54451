//! # Native Method Implementations for the Bootstrap Library
//!
//! The replacement library declares a method `native` wherever its behaviour
//! lives on the host side. This module provides those bodies and the
//! deterministic sources they draw from.
//!
//! ## Native Categories
//!
//! **Language core**
//! - `Object`, `String`, `StringBuilder`, `Class`, `Enum`, `Throwable`
//!
//! **Boxes**
//! - `Integer`, `Long`, `Double`, `Boolean`, `Character` - value `hashCode`
//!   and `equals`
//!
//! **Characters and ordering**
//! - `Character` queries, `UnicodeBlock`, `UnicodeScript` and the case
//!   methods of `String`, all answered from [`crate::unicode`]
//! - `util/Arrays.sort` - a stable merge sort whose comparisons may throw
//!
//! **Numeric and system helpers**
//! - `Math` (platform overflow and NaN rules), `System.arraycopy`,
//!   `System.identityHashCode`
//!
//! **Deterministic stand-ins**
//! - `DeterministicClock` - frozen or advancing, never the wall clock
//! - `util/Random` and `Math.random` - SHA-256(seed || counter)
//!
//! **Injected helpers**
//! - `RuntimeCostAccounter` - forwards to the execution's cost meter
//! - `Runtime.checkCatch` / `Runtime.ruleViolation` - turn fatal errors and
//!   rule violations into non-catchable aborts
//!
//! Every native method declared by the bootstrap library must have an entry
//! here; the library refuses to build otherwise.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};

use sandbox_types::names::from_sandboxed;

use crate::config::ClockPolicy;
use crate::interpreter::{Abort, Interpreter, ObjectKind, Unwind, Value};
use crate::unicode::{self, Script};
use crate::well_known::{
    ARITHMETIC, ARRAYS, ARRAY_INDEX_OUT_OF_BOUNDS, ARRAY_STORE, BLOCK_NAME, BOOLEAN, BOX_VALUE,
    CASE_INSENSITIVE_COMPARATOR, CASE_INSENSITIVE_ORDER, CHARACTER, CHECK_CATCH, CLASS, CLASS_INITIALIZER,
    CLASS_NOT_FOUND, COMPARATOR_DESCRIPTOR, COST_ACCOUNTER, DETERMINISTIC_CLOCK, DOUBLE, ENUM, ENUM_CONSTANTS,
    ENUM_CONSTANTS_DESCRIPTOR, ENUM_NAME, ENUM_ORDINAL, ILLEGAL_ARGUMENT, INTEGER, LONG, MATH, OBJECT, RANDOM,
    RECORD_ALLOCATION, RECORD_ARRAY_ALLOCATION, RECORD_INVOCATION, RECORD_JUMP, RULE_VIOLATION, RUNTIME, STRING,
    STRING_BUILDER, STRING_INDEX_OUT_OF_BOUNDS, SYSTEM, THROWABLE, UNICODE_BLOCK, UNICODE_SCRIPT,
};

/// Result of a native call: the return value for non-void methods.
pub type NativeResult = Result<Option<Value>, Unwind>;

/// A native method body. Receives the receiver first for instance methods.
pub type NativeFn = fn(&mut Interpreter<'_>, &[Value]) -> NativeResult;

// =============================================================================
// Deterministic Sources
// =============================================================================

/// Clock behind `DeterministicClock`.
///
/// Each read returns `base_ms + tick_ms * reads`; a frozen clock has a tick
/// of zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterministicClock {
    pub base_ms: u64,
    pub tick_ms: u64,
    reads: u64,
}

impl DeterministicClock {
    pub fn frozen(timestamp_ms: u64) -> Self {
        Self::advancing(timestamp_ms, 0)
    }

    pub fn advancing(base_ms: u64, tick_ms: u64) -> Self {
        Self {
            base_ms,
            tick_ms,
            reads: 0,
        }
    }

    /// `None` when clock access is rejected.
    pub fn from_policy(policy: ClockPolicy) -> Option<Self> {
        match policy {
            ClockPolicy::Reject => None,
            ClockPolicy::Frozen { timestamp_ms } => Some(Self::frozen(timestamp_ms)),
            ClockPolicy::Advancing { base_ms, tick_ms } => Some(Self::advancing(base_ms, tick_ms)),
        }
    }

    pub fn now_ms(&mut self) -> u64 {
        let now = self
            .base_ms
            .saturating_add(self.tick_ms.saturating_mul(self.reads));
        self.reads += 1;
        now
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

/// Counter-mode generator: block `n` is SHA-256(seed || n).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededRandom {
    seed: [u8; 32],
    counter: u64,
}

impl SeededRandom {
    pub fn new(seed: [u8; 32]) -> Self {
        Self { seed, counter: 0 }
    }

    /// Generator for an explicit `long` seed.
    pub fn from_long(seed: i64) -> Self {
        Self::new(Sha256::digest(seed.to_le_bytes()).into())
    }

    /// Independent generator number `index` under `parent`.
    pub fn derive(parent: &[u8; 32], index: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parent);
        hasher.update(b"instance");
        hasher.update(index.to_le_bytes());
        Self::new(hasher.finalize().into())
    }

    fn next_block(&mut self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_le_bytes());
        self.counter += 1;
        hasher.finalize().into()
    }

    pub fn next_u64(&mut self) -> u64 {
        let block = self.next_block();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&block[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn next_int(&mut self) -> i32 {
        self.next_u64() as i32
    }

    /// Uniform in `[0, bound)`; `bound` must be positive.
    pub fn next_bounded(&mut self, bound: i32) -> i32 {
        (self.next_u64() % bound.max(1) as u64) as i32
    }

    pub fn next_long(&mut self) -> i64 {
        self.next_u64() as i64
    }

    /// Uniform in `[0, 1)` with 53 bits of precision.
    pub fn next_double(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }
}

// =============================================================================
// Native Table
// =============================================================================

/// Native bodies by `owner.namedescriptor`.
#[derive(Default)]
pub struct NativeTable {
    entries: HashMap<String, NativeFn>,
}

impl fmt::Debug for NativeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, owner: &str, name: &str, descriptor: &str, native: NativeFn) {
        self.entries
            .insert(format!("{}.{}{}", owner, name, descriptor), native);
    }

    pub fn get(&self, qualified_name: &str) -> Option<NativeFn> {
        self.entries.get(qualified_name).copied()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.entries.contains_key(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Build the complete native table of the bootstrap library.
pub fn native_table() -> NativeTable {
    let mut table = NativeTable::new();
    add_object_natives(&mut table);
    add_string_natives(&mut table);
    add_builder_natives(&mut table);
    add_box_natives(&mut table);
    add_character_natives(&mut table);
    add_arrays_natives(&mut table);
    add_math_natives(&mut table);
    add_system_natives(&mut table);
    add_class_natives(&mut table);
    add_random_natives(&mut table);
    add_helper_natives(&mut table);
    table
}

// =============================================================================
// Argument Helpers
// =============================================================================

fn bad_argument(index: usize, expected: &str, found: Option<&Value>) -> Unwind {
    Unwind::Abort(Abort::Malformed(format!(
        "native argument {} should be {}, found {}",
        index,
        expected,
        found.map_or("nothing", |v| v.kind())
    )))
}

fn arg(args: &[Value], index: usize) -> Result<Value, Unwind> {
    args.get(index)
        .copied()
        .ok_or_else(|| bad_argument(index, "a value", None))
}

fn int_arg(args: &[Value], index: usize) -> Result<i32, Unwind> {
    match args.get(index) {
        Some(Value::Int(v)) => Ok(*v),
        other => Err(bad_argument(index, "int", other)),
    }
}

fn long_arg(args: &[Value], index: usize) -> Result<i64, Unwind> {
    match args.get(index) {
        Some(Value::Long(v)) => Ok(*v),
        other => Err(bad_argument(index, "long", other)),
    }
}

fn double_arg(args: &[Value], index: usize) -> Result<f64, Unwind> {
    match args.get(index) {
        Some(Value::Double(v)) => Ok(*v),
        other => Err(bad_argument(index, "double", other)),
    }
}

fn string_arg(interp: &mut Interpreter<'_>, args: &[Value], index: usize) -> Result<String, Unwind> {
    let value = arg(args, index)?;
    interp.string_arg(value)
}

fn boolean(value: bool) -> NativeResult {
    Ok(Some(Value::Int(i32::from(value))))
}

fn returns_string(interp: &mut Interpreter<'_>, text: String) -> NativeResult {
    interp.new_string(text).map(Some)
}

fn utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Text of one UTF-16 code unit; lone surrogates become U+FFFD.
fn char_text(unit: i32) -> String {
    String::from_utf16_lossy(&[unit as u16])
}

/// Decimal rendering of a double following the platform's `toString`:
/// `1.0`, `0.001`, `1.0E7`, `NaN`, `-Infinity`.
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let magnitude = value.abs();
    if (1e-3..1e7).contains(&magnitude) {
        let text = value.to_string();
        return if text.contains('.') { text } else { format!("{}.0", text) };
    }
    let scientific = format!("{:e}", value);
    match scientific.split_once('e') {
        Some((mantissa, exponent)) if mantissa.contains('.') => format!("{}E{}", mantissa, exponent),
        Some((mantissa, exponent)) => format!("{}.0E{}", mantissa, exponent),
        None => scientific,
    }
}

fn hex_hash(hash: i32) -> String {
    format!("{:x}", hash as u32)
}

// =============================================================================
// Object
// =============================================================================

fn add_object_natives(table: &mut NativeTable) {
    table.register(OBJECT, "hashCode", "()I", object_hash_code);
    table.register(OBJECT, "toString", "()Lsandbox/lang/String;", object_to_string);
    table.register(OBJECT, "getClass", "()Lsandbox/lang/Class;", object_get_class);
}

fn object_hash_code(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let this = interp.object(arg(args, 0)?)?;
    Ok(Some(Value::Int(interp.identity_hash(this)?)))
}

fn object_to_string(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let this = arg(args, 0)?;
    let object = interp.object(this)?;
    let name = interp.type_name(object);
    let hash = match interp.invoke_virtual(this, "hashCode", "()I", Vec::new())? {
        Some(Value::Int(hash)) => hash,
        other => return Err(bad_argument(0, "an int hash code", other.as_ref())),
    };
    returns_string(interp, format!("{}@{}", name, hex_hash(hash)))
}

fn object_get_class(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let this = interp.object(arg(args, 0)?)?;
    let name = match interp.heap().get(this).map(|o| (&o.kind, o.class.name.clone())) {
        Some((ObjectKind::Array { element, .. }, _)) => format!("[{}", element),
        Some((_, class_name)) => class_name,
        None => return Err(bad_argument(0, "a live object", None)),
    };
    interp.class_handle(&name).map(Some)
}

// =============================================================================
// String
// =============================================================================

const STRING_DESC: &str = "Lsandbox/lang/String;";

fn add_string_natives(table: &mut NativeTable) {
    table.register(STRING, "<init>", "()V", string_init_empty);
    table.register(STRING, "<init>", "(Lsandbox/lang/String;)V", string_init_copy);
    table.register(STRING, "length", "()I", string_length);
    table.register(STRING, "charAt", "(I)C", string_char_at);
    table.register(STRING, "isEmpty", "()Z", string_is_empty);
    table.register(STRING, "concat", "(Lsandbox/lang/String;)Lsandbox/lang/String;", string_concat);
    table.register(STRING, "equals", "(Lsandbox/lang/Object;)Z", string_equals);
    table.register(STRING, "hashCode", "()I", string_hash_code);
    table.register(STRING, "compareTo", "(Lsandbox/lang/Object;)I", string_compare_to);
    table.register(STRING, "toString", "()Lsandbox/lang/String;", string_to_string);
    table.register(STRING, "substring", "(I)Lsandbox/lang/String;", string_substring_from);
    table.register(STRING, "substring", "(II)Lsandbox/lang/String;", string_substring);
    table.register(STRING, "indexOf", "(Lsandbox/lang/String;)I", string_index_of);
    table.register(STRING, "startsWith", "(Lsandbox/lang/String;)Z", string_starts_with);
    table.register(STRING, "endsWith", "(Lsandbox/lang/String;)Z", string_ends_with);
    table.register(STRING, "valueOf", "(I)Lsandbox/lang/String;", string_value_of);
    table.register(STRING, "valueOf", "(J)Lsandbox/lang/String;", string_value_of);
    table.register(STRING, "valueOf", "(D)Lsandbox/lang/String;", string_value_of);
    table.register(STRING, "valueOf", "(C)Lsandbox/lang/String;", string_value_of_char);
    table.register(STRING, "valueOf", "(Z)Lsandbox/lang/String;", string_value_of_bool);
    table.register(STRING, "valueOf", "(Lsandbox/lang/Object;)Lsandbox/lang/String;", string_value_of);
    table.register(STRING, "toUpperCase", "()Lsandbox/lang/String;", string_to_upper_case);
    table.register(STRING, "toLowerCase", "()Lsandbox/lang/String;", string_to_lower_case);
    table.register(STRING, "compareToIgnoreCase", "(Lsandbox/lang/String;)I", string_compare_to_ignore_case);
    table.register(STRING, "equalsIgnoreCase", "(Lsandbox/lang/String;)Z", string_equals_ignore_case);
    table.register(STRING, CLASS_INITIALIZER, "()V", string_initialize);
    table.register(CASE_INSENSITIVE_COMPARATOR, "compare", COMPARATOR_DESCRIPTOR, case_insensitive_compare);
}

fn set_string(interp: &mut Interpreter<'_>, this: Value, text: String) -> NativeResult {
    let object = interp.object(this)?;
    match interp.heap_mut().get_mut(object).map(|o| &mut o.kind) {
        Some(ObjectKind::Str(content)) => {
            *content = text;
            Ok(None)
        }
        _ => Err(bad_argument(0, "a string", Some(&this))),
    }
}

fn string_init_empty(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    set_string(interp, arg(args, 0)?, String::new())
}

fn string_init_copy(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 1)?;
    set_string(interp, arg(args, 0)?, text)
}

fn string_length(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    Ok(Some(Value::Int(text.encode_utf16().count() as i32)))
}

fn string_index_error(interp: &mut Interpreter<'_>, index: i32, length: usize) -> Unwind {
    interp.throwable(
        STRING_INDEX_OUT_OF_BOUNDS,
        Some(format!("Index {} out of bounds for length {}", index, length)),
    )
}

fn string_char_at(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let units = utf16(&string_arg(interp, args, 0)?);
    let index = int_arg(args, 1)?;
    match usize::try_from(index).ok().and_then(|i| units.get(i)) {
        Some(unit) => Ok(Some(Value::Int(i32::from(*unit)))),
        None => Err(string_index_error(interp, index, units.len())),
    }
}

fn string_is_empty(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    boolean(string_arg(interp, args, 0)?.is_empty())
}

fn string_concat(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let mut text = string_arg(interp, args, 0)?;
    text.push_str(&string_arg(interp, args, 1)?);
    returns_string(interp, text)
}

fn string_equals(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    let other = interp.string_content(arg(args, 1)?);
    boolean(other.as_deref() == Some(text.as_str()))
}

fn string_hash_code(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    let hash = text
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    Ok(Some(Value::Int(hash)))
}

fn string_compare_to(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let left = utf16(&string_arg(interp, args, 0)?);
    let right = utf16(&string_arg(interp, args, 1)?);
    let difference = left
        .iter()
        .zip(&right)
        .find(|(a, b)| a != b)
        .map(|(a, b)| i32::from(*a) - i32::from(*b))
        .unwrap_or(left.len() as i32 - right.len() as i32);
    Ok(Some(Value::Int(difference)))
}

fn string_to_string(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    Ok(Some(arg(args, 0)?))
}

fn substring(interp: &mut Interpreter<'_>, text: &str, begin: i32, end: Option<i32>) -> NativeResult {
    let units = utf16(text);
    let end = end.unwrap_or(units.len() as i32);
    if begin < 0 || end > units.len() as i32 || begin > end {
        return Err(interp.throwable(
            STRING_INDEX_OUT_OF_BOUNDS,
            Some(format!("begin {}, end {}, length {}", begin, end, units.len())),
        ));
    }
    returns_string(interp, String::from_utf16_lossy(&units[begin as usize..end as usize]))
}

fn string_substring_from(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    substring(interp, &text, int_arg(args, 1)?, None)
}

fn string_substring(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    substring(interp, &text, int_arg(args, 1)?, Some(int_arg(args, 2)?))
}

fn string_index_of(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let haystack = utf16(&string_arg(interp, args, 0)?);
    let needle = utf16(&string_arg(interp, args, 1)?);
    let index = if needle.is_empty() {
        Some(0)
    } else {
        haystack.windows(needle.len()).position(|w| w == needle.as_slice())
    };
    Ok(Some(Value::Int(index.map_or(-1, |i| i as i32))))
}

fn string_starts_with(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    boolean(text.starts_with(&string_arg(interp, args, 1)?))
}

fn string_ends_with(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    boolean(text.ends_with(&string_arg(interp, args, 1)?))
}

fn string_value_of(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = interp.display(arg(args, 0)?)?;
    returns_string(interp, text)
}

fn string_value_of_char(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    returns_string(interp, char_text(int_arg(args, 0)?))
}

fn string_value_of_bool(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    returns_string(interp, (int_arg(args, 0)? != 0).to_string())
}

fn string_to_upper_case(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    returns_string(interp, unicode::upper_case(&text))
}

fn string_to_lower_case(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    returns_string(interp, unicode::lower_case(&text))
}

fn compare_ignoring_case(interp: &mut Interpreter<'_>, args: &[Value], left: usize, right: usize) -> Result<i32, Unwind> {
    let left = utf16(&string_arg(interp, args, left)?);
    let right = utf16(&string_arg(interp, args, right)?);
    Ok(unicode::compare_ignore_case(&left, &right))
}

fn string_compare_to_ignore_case(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Int(compare_ignoring_case(interp, args, 0, 1)?)))
}

fn string_equals_ignore_case(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 0)?;
    let Some(other) = interp.string_content(arg(args, 1)?) else {
        return boolean(false);
    };
    let (left, right) = (utf16(&text), utf16(&other));
    boolean(left.len() == right.len() && unicode::compare_ignore_case(&left, &right) == 0)
}

/// Fills `CASE_INSENSITIVE_ORDER`. The comparator gets its identity hash
/// lazily so user-visible hashes are unaffected.
fn string_initialize(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    let comparator = interp.class(CASE_INSENSITIVE_COMPARATOR)?;
    let instance = interp.alloc_instance(&comparator, false)?;
    interp.set_static(STRING, CASE_INSENSITIVE_ORDER, Value::Ref(instance));
    Ok(None)
}

fn case_insensitive_compare(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Int(compare_ignoring_case(interp, args, 1, 2)?)))
}

// =============================================================================
// StringBuilder
// =============================================================================

fn add_builder_natives(table: &mut NativeTable) {
    table.register(STRING_BUILDER, "<init>", "()V", builder_init_empty);
    table.register(STRING_BUILDER, "<init>", "(Lsandbox/lang/String;)V", builder_init_copy);
    for descriptor in ["I", "J", "D", "Lsandbox/lang/Object;", STRING_DESC] {
        table.register(
            STRING_BUILDER,
            "append",
            &format!("({})Lsandbox/lang/StringBuilder;", descriptor),
            builder_append,
        );
    }
    table.register(STRING_BUILDER, "append", "(C)Lsandbox/lang/StringBuilder;", builder_append_char);
    table.register(STRING_BUILDER, "append", "(Z)Lsandbox/lang/StringBuilder;", builder_append_bool);
    table.register(STRING_BUILDER, "toString", "()Lsandbox/lang/String;", builder_to_string);
    table.register(STRING_BUILDER, "length", "()I", builder_length);
}

fn with_builder<T>(interp: &mut Interpreter<'_>, this: Value, f: impl FnOnce(&mut String) -> T) -> Result<T, Unwind> {
    let object = interp.object(this)?;
    match interp.heap_mut().get_mut(object).map(|o| &mut o.kind) {
        Some(ObjectKind::Builder(content)) => Ok(f(content)),
        _ => Err(bad_argument(0, "a string builder", Some(&this))),
    }
}

fn append_text(interp: &mut Interpreter<'_>, this: Value, text: &str) -> NativeResult {
    with_builder(interp, this, |content| content.push_str(text))?;
    Ok(Some(this))
}

fn builder_init_empty(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    with_builder(interp, arg(args, 0)?, String::clear)?;
    Ok(None)
}

fn builder_init_copy(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = string_arg(interp, args, 1)?;
    with_builder(interp, arg(args, 0)?, |content| *content = text)?;
    Ok(None)
}

fn builder_append(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = interp.display(arg(args, 1)?)?;
    append_text(interp, arg(args, 0)?, &text)
}

fn builder_append_char(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = char_text(int_arg(args, 1)?);
    append_text(interp, arg(args, 0)?, &text)
}

fn builder_append_bool(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = (int_arg(args, 1)? != 0).to_string();
    append_text(interp, arg(args, 0)?, &text)
}

fn builder_to_string(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let text = with_builder(interp, arg(args, 0)?, |content| content.clone())?;
    returns_string(interp, text)
}

fn builder_length(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let length = with_builder(interp, arg(args, 0)?, |content| content.encode_utf16().count())?;
    Ok(Some(Value::Int(length as i32)))
}

// =============================================================================
// Boxes
// =============================================================================

fn add_box_natives(table: &mut NativeTable) {
    for owner in [INTEGER, LONG, DOUBLE, BOOLEAN, CHARACTER] {
        table.register(owner, "hashCode", "()I", box_hash_code);
        table.register(owner, "equals", "(Lsandbox/lang/Object;)Z", box_equals);
    }
}

/// Boxed primitive of `value` together with the box class.
fn unbox(interp: &mut Interpreter<'_>, value: Value) -> Result<Option<(String, Value)>, Unwind> {
    let Value::Ref(object) = value else {
        return Ok(None);
    };
    let Some(class_name) = interp.heap().get(object).map(|o| o.class.name.clone()) else {
        return Ok(None);
    };
    Ok(interp
        .get_field(object, &class_name, BOX_VALUE)
        .map(|primitive| (class_name, primitive)))
}

/// Bits of a double with every NaN collapsed to one pattern.
fn canonical_bits(value: f64) -> u64 {
    if value.is_nan() {
        0x7ff8_0000_0000_0000
    } else {
        value.to_bits()
    }
}

fn box_hash_code(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let this = arg(args, 0)?;
    interp.object(this)?;
    let hash = match unbox(interp, this)? {
        Some((class, Value::Int(v))) if class == BOOLEAN => if v != 0 { 1231 } else { 1237 },
        Some((_, Value::Int(v))) => v,
        Some((_, Value::Long(v))) => (v ^ ((v as u64) >> 32) as i64) as i32,
        Some((_, Value::Double(v))) => {
            let bits = canonical_bits(v);
            (bits ^ (bits >> 32)) as i32
        }
        _ => return Err(bad_argument(0, "a boxed primitive", Some(&this))),
    };
    Ok(Some(Value::Int(hash)))
}

fn box_equals(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let this = arg(args, 0)?;
    interp.object(this)?;
    let Some((class, value)) = unbox(interp, this)? else {
        return Err(bad_argument(0, "a boxed primitive", Some(&this)));
    };
    let equal = match unbox(interp, arg(args, 1)?)? {
        Some((other_class, other)) if other_class == class => match (value, other) {
            (Value::Double(a), Value::Double(b)) => canonical_bits(a) == canonical_bits(b),
            (a, b) => a == b,
        },
        _ => false,
    };
    boolean(equal)
}

// =============================================================================
// Character
// =============================================================================

/// `(name, result)` queries registered for both `char` and code point
/// arguments.
const CHARACTER_QUERIES: &[(&str, &str, NativeFn)] = &[
    ("isDigit", "Z", character_is_digit),
    ("isLetter", "Z", character_is_letter),
    ("isLetterOrDigit", "Z", character_is_letter_or_digit),
    ("isAlphabetic", "Z", character_is_alphabetic),
    ("isWhitespace", "Z", character_is_whitespace),
    ("isSpaceChar", "Z", character_is_space_char),
    ("isUpperCase", "Z", character_is_upper_case),
    ("isLowerCase", "Z", character_is_lower_case),
    ("getType", "I", character_get_type),
    ("getNumericValue", "I", character_get_numeric_value),
];

fn add_character_natives(table: &mut NativeTable) {
    for (name, result, native) in CHARACTER_QUERIES {
        for argument in ["C", "I"] {
            table.register(CHARACTER, name, &format!("({}){}", argument, result), *native);
        }
    }
    table.register(CHARACTER, "toUpperCase", "(C)C", character_to_upper_case);
    table.register(CHARACTER, "toUpperCase", "(I)I", character_to_upper_case);
    table.register(CHARACTER, "toLowerCase", "(C)C", character_to_lower_case);
    table.register(CHARACTER, "toLowerCase", "(I)I", character_to_lower_case);
    table.register(CHARACTER, "digit", "(CI)I", character_digit);
    table.register(CHARACTER, "digit", "(II)I", character_digit);
    table.register(CHARACTER, "forDigit", "(II)C", character_for_digit);
    table.register(CHARACTER, "isValidCodePoint", "(I)Z", character_is_valid_code_point);
    table.register(CHARACTER, "toString", "(C)Lsandbox/lang/String;", string_value_of_char);

    let block = format!("L{};", UNICODE_BLOCK);
    table.register(UNICODE_BLOCK, CLASS_INITIALIZER, "()V", block_initialize);
    table.register(UNICODE_BLOCK, "of", &format!("(C){}", block), block_of);
    table.register(UNICODE_BLOCK, "of", &format!("(I){}", block), block_of);
    table.register(UNICODE_BLOCK, "forName", &format!("({}){}", STRING_DESC, block), block_for_name);

    let script = format!("L{};", UNICODE_SCRIPT);
    table.register(UNICODE_SCRIPT, CLASS_INITIALIZER, "()V", script_initialize);
    table.register(UNICODE_SCRIPT, "of", &format!("(I){}", script), script_of);
    table.register(UNICODE_SCRIPT, "forName", &format!("({}){}", STRING_DESC, script), script_for_name);
}

/// `test` on the code point argument; false for values that are not code
/// points.
fn test_code_point(args: &[Value], test: fn(u32) -> bool) -> NativeResult {
    boolean(unicode::code_point(int_arg(args, 0)?).is_some_and(test))
}

fn map_code_point(args: &[Value], otherwise: i32, map: impl FnOnce(u32) -> i32) -> NativeResult {
    let value = int_arg(args, 0)?;
    Ok(Some(Value::Int(unicode::code_point(value).map_or(otherwise, map))))
}

fn character_is_digit(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_digit)
}

fn character_is_letter(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_letter)
}

fn character_is_letter_or_digit(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_letter_or_digit)
}

fn character_is_alphabetic(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_alphabetic)
}

fn character_is_whitespace(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_whitespace)
}

fn character_is_space_char(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_space_char)
}

fn character_is_upper_case(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_upper_case)
}

fn character_is_lower_case(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    test_code_point(args, unicode::is_lower_case)
}

fn character_get_type(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    map_code_point(args, unicode::UNASSIGNED, unicode::category)
}

fn character_get_numeric_value(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    map_code_point(args, -1, unicode::numeric_value)
}

fn character_to_upper_case(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = int_arg(args, 0)?;
    map_code_point(args, value, |c| unicode::to_upper(c) as i32)
}

fn character_to_lower_case(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = int_arg(args, 0)?;
    map_code_point(args, value, |c| unicode::to_lower(c) as i32)
}

fn character_digit(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let radix = int_arg(args, 1)?;
    map_code_point(args, -1, |c| unicode::digit(c, radix))
}

fn character_for_digit(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let digit = unicode::for_digit(int_arg(args, 0)?, int_arg(args, 1)?);
    Ok(Some(Value::Int(digit as i32)))
}

fn character_is_valid_code_point(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    boolean(unicode::code_point(int_arg(args, 0)?).is_some())
}

fn invalid_code_point(interp: &mut Interpreter<'_>, value: i32) -> Unwind {
    interp.throwable(
        ILLEGAL_ARGUMENT,
        Some(format!("Not a valid Unicode code point: 0x{:X}", value)),
    )
}

/// Static constant `name` of a lookup class, initializing the class first.
fn lookup_constant(interp: &mut Interpreter<'_>, owner: &str, name: &str) -> NativeResult {
    let class = interp.class(owner)?;
    interp.ensure_initialized(&class)?;
    Ok(Some(interp.static_field(owner, name).unwrap_or(Value::Null)))
}

fn block_initialize(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    let class = interp.class(UNICODE_BLOCK)?;
    for block in unicode::BLOCKS {
        let instance = interp.alloc_instance(&class, false)?;
        let name = interp.new_string(block.name.to_string())?;
        interp.set_field(instance, format!("{}.{}", UNICODE_BLOCK, BLOCK_NAME), name)?;
        interp.set_static(UNICODE_BLOCK, block.name, Value::Ref(instance));
    }
    Ok(None)
}

fn block_of(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = int_arg(args, 0)?;
    let Some(code_point) = unicode::code_point(value) else {
        return Err(invalid_code_point(interp, value));
    };
    match unicode::block_of(code_point) {
        Some(block) => lookup_constant(interp, UNICODE_BLOCK, block.name),
        None => Ok(Some(Value::Null)),
    }
}

fn block_for_name(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let name = string_arg(interp, args, 0)?;
    match unicode::block_named(&name) {
        Some(block) => lookup_constant(interp, UNICODE_BLOCK, block.name),
        None => Err(interp.throwable(ILLEGAL_ARGUMENT, Some(format!("Not a valid block name: {}", name)))),
    }
}

fn script_initialize(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    let class = interp.class(UNICODE_SCRIPT)?;
    for script in Script::ALL {
        let instance = interp.alloc_instance(&class, false)?;
        let name = interp.new_string(script.name().to_string())?;
        interp.set_field(instance, format!("{}.{}", ENUM, ENUM_NAME), name)?;
        interp.set_field(instance, format!("{}.{}", ENUM, ENUM_ORDINAL), Value::Int(script.ordinal()))?;
        interp.set_static(UNICODE_SCRIPT, script.name(), Value::Ref(instance));
    }
    Ok(None)
}

fn script_of(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = int_arg(args, 0)?;
    let Some(code_point) = unicode::code_point(value) else {
        return Err(invalid_code_point(interp, value));
    };
    lookup_constant(interp, UNICODE_SCRIPT, unicode::script_of(code_point).name())
}

fn script_for_name(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let name = string_arg(interp, args, 0)?;
    match Script::named(&name) {
        Some(script) => lookup_constant(interp, UNICODE_SCRIPT, script.name()),
        None => Err(interp.throwable(ILLEGAL_ARGUMENT, Some(format!("No script named {}", name)))),
    }
}

// =============================================================================
// Arrays
// =============================================================================

fn add_arrays_natives(table: &mut NativeTable) {
    table.register(ARRAYS, "sort", "([Lsandbox/lang/Object;)V", arrays_sort_natural);
    table.register(ARRAYS, "sort", "([Lsandbox/lang/Object;Lsandbox/util/Comparator;)V", arrays_sort_with);
    for primitive in ["I", "J", "D"] {
        table.register(ARRAYS, "sort", &format!("([{})V", primitive), arrays_sort_primitive);
    }
}

/// The array argument at `index` and a copy of its elements.
fn array_arg(interp: &mut Interpreter<'_>, args: &[Value], index: usize) -> Result<(Value, Vec<Value>), Unwind> {
    let array = arg(args, index)?;
    if array == Value::Null {
        return Err(interp.null_pointer());
    }
    match interp.array_values(array) {
        Some((_, values)) => Ok((array, values.to_vec())),
        None => Err(bad_argument(index, "an array", Some(&array))),
    }
}

fn store_sorted(interp: &mut Interpreter<'_>, array: Value, sorted: Vec<Value>) -> NativeResult {
    match interp.array_values_mut(array) {
        Some(values) => {
            *values = sorted;
            Ok(None)
        }
        None => Err(bad_argument(0, "an array", Some(&array))),
    }
}

fn int_result(result: Option<Value>, method: &str) -> Result<i32, Unwind> {
    match result {
        Some(Value::Int(v)) => Ok(v),
        other => Err(Unwind::Abort(Abort::Malformed(format!(
            "{} returned {} instead of an int",
            method,
            other.map_or("nothing", |v| v.kind())
        )))),
    }
}

/// Stable merge sort. `compare` may unwind; an inconsistent comparison
/// produces some permutation of the input rather than a panic.
fn merge_sort<F>(mut values: Vec<Value>, compare: &mut F) -> Result<Vec<Value>, Unwind>
where
    F: FnMut(Value, Value) -> Result<i32, Unwind>,
{
    if values.len() < 2 {
        return Ok(values);
    }
    let right = values.split_off(values.len() / 2);
    let left = merge_sort(values, compare)?;
    let right = merge_sort(right, compare)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if compare(right[j], left[i])? < 0 {
            merged.push(right[j]);
            j += 1;
        } else {
            merged.push(left[i]);
            i += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    Ok(merged)
}

fn natural_order(interp: &mut Interpreter<'_>, left: Value, right: Value) -> Result<i32, Unwind> {
    let result = interp.invoke_virtual(left, "compareTo", "(Lsandbox/lang/Object;)I", vec![right])?;
    int_result(result, "compareTo")
}

fn arrays_sort_natural(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let (array, values) = array_arg(interp, args, 0)?;
    let sorted = merge_sort(values, &mut |a, b| natural_order(interp, a, b))?;
    store_sorted(interp, array, sorted)
}

/// A null comparator sorts by natural order.
fn arrays_sort_with(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let (array, values) = array_arg(interp, args, 0)?;
    let comparator = arg(args, 1)?;
    let sorted = if comparator == Value::Null {
        merge_sort(values, &mut |a, b| natural_order(interp, a, b))?
    } else {
        merge_sort(values, &mut |a, b| {
            let result = interp.invoke_virtual(comparator, "compare", COMPARATOR_DESCRIPTOR, vec![a, b])?;
            int_result(result, "compare")
        })?
    };
    store_sorted(interp, array, sorted)
}

/// Numeric order with `-0.0` before `0.0` and NaN last.
fn primitive_order(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Long(a), Value::Long(b)) => a.cmp(b),
        (Value::Double(a), Value::Double(b)) => {
            f64::from_bits(canonical_bits(*a)).total_cmp(&f64::from_bits(canonical_bits(*b)))
        }
        _ => Ordering::Equal,
    }
}

fn arrays_sort_primitive(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let (array, mut values) = array_arg(interp, args, 0)?;
    values.sort_by(primitive_order);
    store_sorted(interp, array, values)
}

// =============================================================================
// Math
// =============================================================================

fn add_math_natives(table: &mut NativeTable) {
    table.register(MATH, "abs", "(I)I", math_abs);
    table.register(MATH, "abs", "(J)J", math_abs);
    table.register(MATH, "abs", "(D)D", math_abs);
    table.register(MATH, "max", "(II)I", math_max);
    table.register(MATH, "max", "(JJ)J", math_max);
    table.register(MATH, "max", "(DD)D", math_max);
    table.register(MATH, "min", "(II)I", math_min);
    table.register(MATH, "min", "(JJ)J", math_min);
    table.register(MATH, "min", "(DD)D", math_min);
    table.register(MATH, "sqrt", "(D)D", math_sqrt);
    table.register(MATH, "floorMod", "(II)I", math_floor_mod);
    table.register(MATH, "addExact", "(II)I", math_add_exact);
    table.register(MATH, "addExact", "(JJ)J", math_add_exact);
    table.register(MATH, "multiplyExact", "(II)I", math_multiply_exact);
    table.register(MATH, "multiplyExact", "(JJ)J", math_multiply_exact);
    table.register(MATH, "random", "()D", math_random);
}

fn math_abs(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = match arg(args, 0)? {
        Value::Int(v) => Value::Int(v.wrapping_abs()),
        Value::Long(v) => Value::Long(v.wrapping_abs()),
        Value::Double(v) => Value::Double(v.abs()),
        other => return Err(bad_argument(0, "a number", Some(&other))),
    };
    Ok(Some(value))
}

/// `max`/`min` with the platform's rules: NaN wins, and -0.0 < 0.0.
fn extremum(args: &[Value], pick_max: bool) -> NativeResult {
    let value = match (arg(args, 0)?, arg(args, 1)?) {
        (Value::Int(a), Value::Int(b)) => Value::Int(if pick_max { a.max(b) } else { a.min(b) }),
        (Value::Long(a), Value::Long(b)) => Value::Long(if pick_max { a.max(b) } else { a.min(b) }),
        (Value::Double(a), Value::Double(b)) => {
            let picked = if a.is_nan() || b.is_nan() {
                f64::NAN
            } else if a == b {
                let a_wins = if pick_max { !a.is_sign_negative() } else { a.is_sign_negative() };
                if a_wins {
                    a
                } else {
                    b
                }
            } else if (a > b) == pick_max {
                a
            } else {
                b
            };
            Value::Double(picked)
        }
        (other, _) => return Err(bad_argument(0, "a matching pair of numbers", Some(&other))),
    };
    Ok(Some(value))
}

fn math_max(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    extremum(args, true)
}

fn math_min(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    extremum(args, false)
}

fn math_sqrt(_interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Double(double_arg(args, 0)?.sqrt())))
}

fn math_floor_mod(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let (x, y) = (int_arg(args, 0)?, int_arg(args, 1)?);
    if y == 0 {
        return Err(interp.throwable(ARITHMETIC, Some("/ by zero".to_string())));
    }
    let m = x.wrapping_rem(y);
    let result = if m != 0 && ((m ^ y) < 0) { m + y } else { m };
    Ok(Some(Value::Int(result)))
}

fn overflow(interp: &mut Interpreter<'_>, kind: &str) -> Unwind {
    interp.throwable(ARITHMETIC, Some(format!("{} overflow", kind)))
}

fn math_add_exact(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    match (arg(args, 0)?, arg(args, 1)?) {
        (Value::Int(a), Value::Int(b)) => match a.checked_add(b) {
            Some(sum) => Ok(Some(Value::Int(sum))),
            None => Err(overflow(interp, "integer")),
        },
        (Value::Long(a), Value::Long(b)) => match a.checked_add(b) {
            Some(sum) => Ok(Some(Value::Long(sum))),
            None => Err(overflow(interp, "long")),
        },
        (other, _) => Err(bad_argument(0, "a matching pair of integers", Some(&other))),
    }
}

fn math_multiply_exact(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    match (arg(args, 0)?, arg(args, 1)?) {
        (Value::Int(a), Value::Int(b)) => match a.checked_mul(b) {
            Some(product) => Ok(Some(Value::Int(product))),
            None => Err(overflow(interp, "integer")),
        },
        (Value::Long(a), Value::Long(b)) => match a.checked_mul(b) {
            Some(product) => Ok(Some(Value::Long(product))),
            None => Err(overflow(interp, "long")),
        },
        (other, _) => Err(bad_argument(0, "a matching pair of integers", Some(&other))),
    }
}

fn math_random(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    let value = interp.shared_random()?.next_double();
    Ok(Some(Value::Double(value)))
}

// =============================================================================
// System and Clock
// =============================================================================

fn add_system_natives(table: &mut NativeTable) {
    table.register(
        SYSTEM,
        "arraycopy",
        "(Lsandbox/lang/Object;ILsandbox/lang/Object;II)V",
        system_arraycopy,
    );
    table.register(SYSTEM, "identityHashCode", "(Lsandbox/lang/Object;)I", system_identity_hash_code);
    table.register(DETERMINISTIC_CLOCK, "currentTimeMillis", "()J", clock_current_time_millis);
    table.register(DETERMINISTIC_CLOCK, "nanoTime", "()J", clock_nano_time);
}

fn system_arraycopy(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let (source, destination) = (arg(args, 0)?, arg(args, 2)?);
    let (source_pos, destination_pos, length) = (int_arg(args, 1)?, int_arg(args, 3)?, int_arg(args, 4)?);
    interp.object(source)?;
    interp.object(destination)?;
    let shape = |interp: &Interpreter<'_>, value: Value| {
        interp
            .array_values(value)
            .map(|(element, values)| (element.to_string(), values.len()))
    };
    let Some((source_element, source_len)) = shape(interp, source) else {
        return Err(interp.throwable(ARRAY_STORE, Some("arraycopy: source type is not an array".to_string())));
    };
    let Some((destination_element, destination_len)) = shape(interp, destination) else {
        return Err(interp.throwable(
            ARRAY_STORE,
            Some("arraycopy: destination type is not an array".to_string()),
        ));
    };
    let primitive = |element: &str| !element.starts_with('L') && !element.starts_with('[');
    if source_element != destination_element && (primitive(&source_element) || primitive(&destination_element)) {
        return Err(interp.throwable(ARRAY_STORE, Some("arraycopy: type mismatch".to_string())));
    }
    if length < 0
        || source_pos < 0
        || destination_pos < 0
        || source_pos as usize + length as usize > source_len
        || destination_pos as usize + length as usize > destination_len
    {
        return Err(interp.throwable(
            ARRAY_INDEX_OUT_OF_BOUNDS,
            Some(format!(
                "arraycopy: range [{}, {}) out of bounds for length {}",
                source_pos,
                i64::from(source_pos) + i64::from(length),
                source_len
            )),
        ));
    }
    let copied: Vec<Value> = interp
        .array_values(source)
        .map(|(_, values)| values[source_pos as usize..(source_pos + length) as usize].to_vec())
        .unwrap_or_default();
    if let Some(values) = interp.array_values_mut(destination) {
        values[destination_pos as usize..(destination_pos + length) as usize].copy_from_slice(&copied);
    }
    Ok(None)
}

fn system_identity_hash_code(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    match arg(args, 0)? {
        Value::Ref(object) => Ok(Some(Value::Int(interp.identity_hash(object)?))),
        _ => Ok(Some(Value::Int(0))),
    }
}

fn clock_current_time_millis(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    let now = interp.clock_mut()?.now_ms();
    Ok(Some(Value::Long(now as i64)))
}

fn clock_nano_time(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    let now = interp.clock_mut()?.now_ms();
    Ok(Some(Value::Long((now as i64).wrapping_mul(1_000_000))))
}

// =============================================================================
// Class, Enum and Throwable
// =============================================================================

fn add_class_natives(table: &mut NativeTable) {
    table.register(CLASS, "forName", "(Lsandbox/lang/String;)Lsandbox/lang/Class;", class_for_name);
    table.register(CLASS, "getName", "()Lsandbox/lang/String;", class_get_name);
    table.register(CLASS, "toString", "()Lsandbox/lang/String;", class_to_string);
    table.register(ENUM, ENUM_CONSTANTS, ENUM_CONSTANTS_DESCRIPTOR, enum_constants_of);
    table.register(THROWABLE, "toString", "()Lsandbox/lang/String;", throwable_to_string);
}

fn handle_name(interp: &mut Interpreter<'_>, value: Value) -> Result<String, Unwind> {
    let object = interp.object(value)?;
    match interp.heap().get(object).map(|o| &o.kind) {
        Some(ObjectKind::ClassHandle(name)) => Ok(name.clone()),
        _ => Err(bad_argument(0, "a class handle", Some(&value))),
    }
}

/// Original name of a class or array type.
fn original_name(runtime_name: &str) -> String {
    if runtime_name.starts_with('[') {
        runtime_name.replace("Lsandbox/", "L")
    } else {
        from_sandboxed(runtime_name).unwrap_or(runtime_name).to_string()
    }
}

fn class_for_name(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let name = string_arg(interp, args, 0)?.replace('.', "/");
    match interp.loader_mut().load_class(&name) {
        Ok(loaded) => {
            let runtime_name = loaded.class.name.clone();
            interp.class_handle(&runtime_name).map(Some)
        }
        Err(crate::errors::LoadError::ClassNotFound { .. }) => Err(interp.throwable(CLASS_NOT_FOUND, Some(name))),
        Err(error) => Err(error.into()),
    }
}

fn class_get_name(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let name = handle_name(interp, arg(args, 0)?)?;
    returns_string(interp, original_name(&name))
}

fn class_to_string(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let name = handle_name(interp, arg(args, 0)?)?;
    let prefix = match interp.loader_mut().load_runtime(&name) {
        Ok(loaded) if loaded.class.is_interface() => "interface ",
        _ => "class ",
    };
    returns_string(interp, format!("{}{}", prefix, original_name(&name)))
}

fn enum_constants_of(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let name = handle_name(interp, arg(args, 0)?)?;
    if name.starts_with('[') {
        return Ok(Some(Value::Null));
    }
    let class = interp.class(&name)?;
    if class.name == ENUM || !class.is_subclass_of(ENUM) {
        return Ok(Some(Value::Null));
    }
    interp.ensure_initialized(&class)?;
    let constants: Vec<Value> = class
        .fields
        .iter()
        .filter(|f| f.access.is_static() && f.access.contains(sandbox_types::AccessFlags::ENUM))
        .map(|f| interp.static_field(&class.name, &f.name).unwrap_or(Value::Null))
        .collect();
    interp
        .new_array(&format!("L{};", class.name), constants)
        .map(Some)
}

fn throwable_to_string(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let this = arg(args, 0)?;
    let object = interp.object(this)?;
    let class_name = match interp.heap().get(object) {
        Some(o) => interp.loader().original_exception_name(&o.class.name),
        None => return Err(bad_argument(0, "a live object", None)),
    };
    let message = interp.invoke_virtual(this, "getMessage", "()Lsandbox/lang/String;", Vec::new())?;
    let text = match message.and_then(|m| interp.string_content(m)) {
        Some(message) => format!("{}: {}", class_name, message),
        None => class_name,
    };
    returns_string(interp, text)
}

// =============================================================================
// Random
// =============================================================================

fn add_random_natives(table: &mut NativeTable) {
    table.register(RANDOM, "<init>", "()V", random_init);
    table.register(RANDOM, "<init>", "(J)V", random_init_seeded);
    table.register(RANDOM, "nextInt", "()I", random_next_int);
    table.register(RANDOM, "nextInt", "(I)I", random_next_bounded);
    table.register(RANDOM, "nextLong", "()J", random_next_long);
    table.register(RANDOM, "nextDouble", "()D", random_next_double);
    table.register(RANDOM, "nextBoolean", "()Z", random_next_boolean);
}

fn with_random<T>(
    interp: &mut Interpreter<'_>,
    this: Value,
    f: impl FnOnce(&mut SeededRandom) -> T,
) -> Result<T, Unwind> {
    let object = interp.object(this)?;
    match interp.heap_mut().get_mut(object).map(|o| &mut o.kind) {
        Some(ObjectKind::Random(random)) => Ok(f(random)),
        _ => Err(bad_argument(0, "a random generator", Some(&this))),
    }
}

fn random_init(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let generator = interp.next_random_instance()?;
    with_random(interp, arg(args, 0)?, |random| *random = generator)?;
    Ok(None)
}

fn random_init_seeded(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let generator = SeededRandom::from_long(long_arg(args, 1)?);
    with_random(interp, arg(args, 0)?, |random| *random = generator)?;
    Ok(None)
}

fn random_next_int(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = with_random(interp, arg(args, 0)?, SeededRandom::next_int)?;
    Ok(Some(Value::Int(value)))
}

fn random_next_bounded(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let bound = int_arg(args, 1)?;
    if bound <= 0 {
        return Err(interp.throwable(ILLEGAL_ARGUMENT, Some("bound must be positive".to_string())));
    }
    let value = with_random(interp, arg(args, 0)?, |random| random.next_bounded(bound))?;
    Ok(Some(Value::Int(value)))
}

fn random_next_long(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = with_random(interp, arg(args, 0)?, SeededRandom::next_long)?;
    Ok(Some(Value::Long(value)))
}

fn random_next_double(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = with_random(interp, arg(args, 0)?, SeededRandom::next_double)?;
    Ok(Some(Value::Double(value)))
}

fn random_next_boolean(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let value = with_random(interp, arg(args, 0)?, SeededRandom::next_bool)?;
    boolean(value)
}

// =============================================================================
// Injected Helpers
// =============================================================================

fn add_helper_natives(table: &mut NativeTable) {
    table.register(COST_ACCOUNTER, RECORD_INVOCATION, "()V", record_invocation);
    table.register(COST_ACCOUNTER, RECORD_ALLOCATION, "()V", record_allocation);
    table.register(COST_ACCOUNTER, RECORD_ARRAY_ALLOCATION, "(I)V", record_array_allocation);
    table.register(COST_ACCOUNTER, RECORD_JUMP, "()V", record_jump);
    table.register(RUNTIME, CHECK_CATCH, crate::well_known::CHECK_CATCH_DESCRIPTOR, runtime_check_catch);
    table.register(
        RUNTIME,
        RULE_VIOLATION,
        crate::well_known::RULE_VIOLATION_DESCRIPTOR,
        runtime_rule_violation,
    );
}

fn record_invocation(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    interp.meter_mut().record_invocation()?;
    Ok(None)
}

fn record_allocation(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    interp.meter_mut().record_allocation()?;
    Ok(None)
}

fn record_array_allocation(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let length = int_arg(args, 0)?;
    interp.meter_mut().record_array_allocation(length)?;
    Ok(None)
}

fn record_jump(interp: &mut Interpreter<'_>, _args: &[Value]) -> NativeResult {
    interp.meter_mut().record_jump()?;
    Ok(None)
}

/// Entry guard of handlers that could catch a fatal error.
fn runtime_check_catch(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    if let Value::Ref(thrown) = arg(args, 0)? {
        if interp.is_fatal(thrown) {
            return Err(Unwind::Abort(Abort::Fatal(thrown)));
        }
    }
    Ok(None)
}

fn runtime_rule_violation(interp: &mut Interpreter<'_>, args: &[Value]) -> NativeResult {
    let message = string_arg(interp, args, 0)?;
    Err(Unwind::Abort(Abort::RuleViolation(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_follows_policy() {
        assert!(DeterministicClock::from_policy(ClockPolicy::Reject).is_none());
        let mut frozen = DeterministicClock::from_policy(ClockPolicy::Frozen { timestamp_ms: 7 }).unwrap();
        assert_eq!((frozen.now_ms(), frozen.now_ms()), (7, 7));
        let mut advancing = DeterministicClock::advancing(1_000, 10);
        assert_eq!(advancing.now_ms(), 1_000);
        assert_eq!(advancing.now_ms(), 1_010);
        assert_eq!(advancing.reads(), 2);
    }

    #[test]
    fn test_random_is_reproducible() {
        let mut a = SeededRandom::new([7u8; 32]);
        let mut b = SeededRandom::new([7u8; 32]);
        let sequence: Vec<u64> = (0..4).map(|_| a.next_u64()).collect();
        assert_eq!(sequence, (0..4).map(|_| b.next_u64()).collect::<Vec<_>>());
        assert_ne!(sequence[0], sequence[1]);

        let mut other = SeededRandom::derive(&[7u8; 32], 1);
        assert_ne!(other.next_u64(), sequence[0]);
        assert_eq!(SeededRandom::from_long(42), SeededRandom::from_long(42));

        let mut bounded = SeededRandom::new([1u8; 32]);
        for _ in 0..32 {
            assert!((0..10).contains(&bounded.next_bounded(10)));
            let d = bounded.next_double();
            assert!((0.0..1.0).contains(&d));
        }
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(-2.5), "-2.5");
        assert_eq!(format_double(0.001), "0.001");
        assert_eq!(format_double(1e7), "1.0E7");
        assert_eq!(format_double(1.5e-5), "1.5E-5");
        assert_eq!(format_double(-0.0), "-0.0");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_table_registration() {
        let table = native_table();
        assert!(table.contains("sandbox/lang/Object.hashCode()I"));
        assert!(table.contains("sandbox/RuntimeCostAccounter.recordJump()V"));
        assert!(table.contains("sandbox/lang/StringBuilder.append(Lsandbox/lang/String;)Lsandbox/lang/StringBuilder;"));
        assert!(table.contains("sandbox/lang/Character.isLetter(I)Z"));
        assert!(table.contains("sandbox/lang/String.<clinit>()V"));
        assert!(table.contains("sandbox/util/Arrays.sort([Lsandbox/lang/Object;Lsandbox/util/Comparator;)V"));
        assert!(table.get("sandbox/lang/Object.wait()V").is_none());
        let names = table.names();
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(names.len(), table.len());
    }

    #[test]
    fn test_merge_sort_is_stable() {
        // Pairs encoded as key * 10 + tag; only the key is compared.
        let values: Vec<Value> = [31, 10, 32, 20, 11, 33].into_iter().map(Value::Int).collect();
        let key = |v: Value| v.as_int().unwrap_or_default() / 10;
        let sorted = merge_sort(values, &mut |a, b| Ok(key(a) - key(b))).unwrap();
        let sorted: Vec<i32> = sorted.into_iter().filter_map(Value::as_int).collect();
        assert_eq!(sorted, vec![10, 11, 20, 31, 32, 33]);
    }

    #[test]
    fn test_merge_sort_survives_inconsistent_comparisons() {
        let values: Vec<Value> = (0..40).map(Value::Int).collect();
        let mut calls = 0;
        let sorted = merge_sort(values, &mut |_, _| {
            calls += 1;
            Ok(if calls % 3 == 0 { -1 } else { 1 })
        })
        .unwrap();
        let mut seen: Vec<i32> = sorted.into_iter().filter_map(Value::as_int).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_merge_sort_stops_at_first_unwind() {
        let values: Vec<Value> = (0..8).map(Value::Int).collect();
        let result = merge_sort(values, &mut |_, _| Err(Unwind::Abort(Abort::Malformed("boom".into()))));
        assert!(matches!(result, Err(Unwind::Abort(Abort::Malformed(_)))));
    }

    #[test]
    fn test_primitive_order_puts_nan_last() {
        let mut values = vec![
            Value::Double(f64::NAN),
            Value::Double(0.0),
            Value::Double(-0.0),
            Value::Double(f64::NEG_INFINITY),
        ];
        values.sort_by(primitive_order);
        assert_eq!(values[0], Value::Double(f64::NEG_INFINITY));
        assert!(matches!(values[1], Value::Double(v) if v == 0.0 && v.is_sign_negative()));
        assert!(matches!(values[3], Value::Double(v) if v.is_nan()));
    }
}
