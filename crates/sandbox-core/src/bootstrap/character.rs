//! `Character` and its Unicode lookups. Every native answers from the fixed
//! tables in [`crate::unicode`].

use anyhow::Result;

use sandbox_types::{AccessFlags, ClassBuilder, ClassFile, Constant};

use super::lang::{
    box_builder, final_class, natives, PUBLIC, PUBLIC_STATIC, PUBLIC_STATIC_FINAL, PRIVATE_FINAL, STRING_DESC,
};
use crate::unicode::{self, Script, BLOCKS, CATEGORY_NAMES};
use crate::well_known::{
    BLOCK_NAME, CHARACTER, CLASS_INITIALIZER, ENUM, ENUM_CONSTANTS, ENUM_CONSTANTS_DESCRIPTOR, UNICODE_BLOCK,
    UNICODE_SCRIPT,
};

/// Static natives taking one character, declared for `char` and for code
/// points.
const CHARACTER_QUERIES: &[(&str, &str)] = &[
    ("isDigit", "Z"),
    ("isLetter", "Z"),
    ("isLetterOrDigit", "Z"),
    ("isAlphabetic", "Z"),
    ("isWhitespace", "Z"),
    ("isSpaceChar", "Z"),
    ("isUpperCase", "Z"),
    ("isLowerCase", "Z"),
    ("getType", "I"),
    ("getNumericValue", "I"),
];

pub(super) fn character_classes() -> Result<Vec<ClassFile>> {
    Ok(vec![character()?, unicode_block()?, unicode_script()?])
}

fn character() -> Result<ClassFile> {
    let mut builder = box_builder(CHARACTER, "C", "charValue")
        .constant("MIN_VALUE", "C", Constant::Int(0))
        .constant("MAX_VALUE", "C", Constant::Int(0xFFFF))
        .constant("MIN_RADIX", "I", Constant::Int(unicode::MIN_RADIX))
        .constant("MAX_RADIX", "I", Constant::Int(unicode::MAX_RADIX))
        .constant("MIN_CODE_POINT", "I", Constant::Int(0))
        .constant("MAX_CODE_POINT", "I", Constant::Int(unicode::MAX_CODE_POINT));
    for (name, category) in CATEGORY_NAMES {
        builder = builder.constant(name, "B", Constant::Int(*category));
    }
    for (name, result) in CHARACTER_QUERIES {
        builder = builder
            .native_method(name, &format!("(C){}", result), PUBLIC_STATIC)
            .native_method(name, &format!("(I){}", result), PUBLIC_STATIC);
    }
    natives(
        builder,
        PUBLIC_STATIC,
        &[
            ("toUpperCase", "(C)C"),
            ("toUpperCase", "(I)I"),
            ("toLowerCase", "(C)C"),
            ("toLowerCase", "(I)I"),
            ("digit", "(CI)I"),
            ("digit", "(II)I"),
            ("forDigit", "(II)C"),
            ("isValidCodePoint", "(I)Z"),
            ("toString", "(C)Lsandbox/lang/String;"),
        ],
    )
    .build()
}

/// Blocks are plain instances with a name, one static constant each.
fn unicode_block() -> Result<ClassFile> {
    let block_desc = format!("L{};", UNICODE_BLOCK);
    let mut builder = final_class(UNICODE_BLOCK)
        .field(BLOCK_NAME, STRING_DESC, PRIVATE_FINAL)
        .method("toString", "()Lsandbox/lang/String;", PUBLIC | AccessFlags::FINAL, |code| {
            code.load(0).get_field(UNICODE_BLOCK, BLOCK_NAME, STRING_DESC).return_value();
        });
    for block in BLOCKS {
        builder = builder.field(block.name, &block_desc, PUBLIC_STATIC_FINAL);
    }
    natives(
        builder.native_method(CLASS_INITIALIZER, "()V", AccessFlags::STATIC),
        PUBLIC_STATIC,
        &[
            ("of", &format!("(C){}", block_desc)),
            ("of", &format!("(I){}", block_desc)),
            ("forName", &format!("({}){}", STRING_DESC, block_desc)),
        ],
    )
    .build()
}

/// Scripts are an enum over [`Script`].
fn unicode_script() -> Result<ClassFile> {
    let script_desc = format!("L{};", UNICODE_SCRIPT);
    let array_desc = format!("[{}", script_desc);
    let mut builder = ClassBuilder::new(UNICODE_SCRIPT)
        .extends(ENUM)
        .access(PUBLIC | AccessFlags::FINAL | AccessFlags::ENUM);
    for script in Script::ALL {
        builder = builder.field(script.name(), &script_desc, PUBLIC_STATIC_FINAL | AccessFlags::ENUM);
    }
    let values = format!("(){}", array_desc);
    natives(
        builder
            .method("values", &values, PUBLIC_STATIC, |code| {
                code.push_class(UNICODE_SCRIPT)
                    .invoke_static(ENUM, ENUM_CONSTANTS, ENUM_CONSTANTS_DESCRIPTOR)
                    .check_cast(&array_desc)
                    .return_value();
            })
            .native_method(CLASS_INITIALIZER, "()V", AccessFlags::STATIC),
        PUBLIC_STATIC,
        &[
            ("of", &format!("(I){}", script_desc)),
            ("forName", &format!("({}){}", STRING_DESC, script_desc)),
        ],
    )
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_declares_both_query_forms() {
        let character = character().unwrap();
        for (name, _) in CHARACTER_QUERIES {
            let forms = character.methods.iter().filter(|m| m.name == *name).count();
            assert_eq!(forms, 2, "{}", name);
        }
        let constants = character
            .fields
            .iter()
            .filter(|f| f.descriptor == "B")
            .count();
        assert_eq!(constants, CATEGORY_NAMES.len());
    }

    #[test]
    fn test_lookup_classes_declare_one_constant_per_entry() {
        let blocks = unicode_block().unwrap();
        let statics = blocks.fields.iter().filter(|f| f.access.is_static()).count();
        assert_eq!(statics, BLOCKS.len());

        let scripts = unicode_script().unwrap();
        let constants: Vec<&str> = scripts
            .fields
            .iter()
            .filter(|f| f.access.contains(AccessFlags::ENUM))
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(constants.first(), Some(&"COMMON"));
        assert_eq!(constants.len(), Script::ALL.len());
    }
}
