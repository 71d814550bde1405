//! Printing and inspecting GraphQL literals.

use apollo_compiler::ast;
use indexmap::IndexSet;

pub(crate) fn print_value(value: &ast::Value) -> String {
    let mut output = String::new();
    write_value(&mut output, value);
    output
}

fn write_value(output: &mut String, value: &ast::Value) {
    match value {
        ast::Value::Null => output.push_str("null"),
        ast::Value::Enum(name) => output.push_str(name),
        ast::Value::Variable(name) => {
            output.push('$');
            output.push_str(name);
        }
        ast::Value::String(string) => {
            // JSON string escaping is a valid GraphQL string literal.
            output.push_str(
                &serde_json::to_string(string.as_str()).unwrap_or_else(|_| "\"\"".to_string()),
            );
        }
        ast::Value::Float(float) => output.push_str(float.as_str()),
        ast::Value::Int(int) => output.push_str(int.as_str()),
        ast::Value::Boolean(boolean) => output.push_str(if *boolean { "true" } else { "false" }),
        ast::Value::List(items) => {
            output.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    output.push_str(", ");
                }
                write_value(output, item);
            }
            output.push(']');
        }
        ast::Value::Object(fields) => {
            output.push('{');
            for (index, (name, item)) in fields.iter().enumerate() {
                if index > 0 {
                    output.push_str(", ");
                }
                output.push_str(name);
                output.push_str(": ");
                write_value(output, item);
            }
            output.push('}');
        }
    }
}

/// Adds every variable referenced by `value` to `variables`.
pub(crate) fn collect_variables(value: &ast::Value, variables: &mut IndexSet<String>) {
    match value {
        ast::Value::Variable(name) => {
            variables.insert(name.to_string());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_variables(item, variables);
            }
        }
        ast::Value::Object(fields) => {
            for (_, item) in fields {
                collect_variables(item, variables);
            }
        }
        _ => {}
    }
}
