/// GDB/MI command text
///
/// Every string argument is quoted and escaped, so paths and expressions
/// with spaces or quotes reach GDB intact.

use std::path::Path;

use crate::breakpoints::BreakpointId;
use crate::parser::escape_c_string;

pub const GDB_EXIT: &str = "-gdb-exit";
pub const EXEC_RUN: &str = "-exec-run";
pub const EXEC_CONTINUE: &str = "-exec-continue";
pub const EXEC_NEXT: &str = "-exec-next";
pub const EXEC_STEP: &str = "-exec-step";
pub const EXEC_FINISH: &str = "-exec-finish";
pub const EXEC_INTERRUPT: &str = "-exec-interrupt";
pub const STACK_LIST_FRAMES: &str = "-stack-list-frames";
pub const STACK_LIST_VARIABLES_ALL: &str = "-stack-list-variables --all-values";
pub const STACK_LIST_VARIABLES_SIMPLE: &str = "-stack-list-variables --simple-values";

/// Settings sent right after the handshake
pub const INIT_SETTINGS: &[&str] = &[
    "-gdb-set confirm off",
    "-gdb-set pagination off",
    "-gdb-set breakpoint pending on",
];

pub fn quote(text: &str) -> String {
    format!("\"{}\"", escape_c_string(text))
}

pub fn environment_directory(dir: &Path) -> String {
    format!("-environment-directory {}", quote(&dir.to_string_lossy()))
}

pub fn break_insert(file: &str, line: u32) -> String {
    format!("-break-insert {}", quote(&format!("{}:{}", file, line)))
}

pub fn break_delete(id: BreakpointId) -> String {
    format!("-break-delete {}", id)
}

pub fn evaluate_expression(expression: &str) -> String {
    format!("-data-evaluate-expression {}", quote(expression))
}

pub fn var_create(varobj: &str, expression: &str) -> String {
    format!("-var-create {} * {}", varobj, quote(expression))
}

pub fn var_list_children(varobj: &str) -> String {
    format!("-var-list-children --all-values {}", varobj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_insert_quotes_location() {
        assert_eq!(break_insert("main.cpp", 5), r#"-break-insert "main.cpp:5""#);
        assert_eq!(
            break_insert("C:\\my dir\\a.cpp", 3),
            r#"-break-insert "C:\\my dir\\a.cpp:3""#
        );
    }

    #[test]
    fn test_evaluate_expression_escapes_quotes() {
        assert_eq!(
            evaluate_expression("strlen(\"ab\")"),
            r#"-data-evaluate-expression "strlen(\"ab\")""#
        );
    }

    #[test]
    fn test_varobj_commands() {
        assert_eq!(var_create("var1", "v"), r#"-var-create var1 * "v""#);
        assert_eq!(var_list_children("var1"), "-var-list-children --all-values var1");
        assert_eq!(break_delete(BreakpointId(4)), "-break-delete 4");
    }
}
