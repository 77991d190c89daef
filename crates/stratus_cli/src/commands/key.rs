//! Key command implementation.

use super::QueryArgs;

/// Runs the key command. Returns the text to print.
pub fn run(args: &QueryArgs, format: &str) -> Result<String, Box<dyn std::error::Error>> {
    let query = args.to_builder()?.build()?;
    let key = query.canonical_key();

    match format {
        "json" => {
            let output = serde_json::json!({
                "key": key.as_str(),
                "predicate": query.predicate().as_ref(),
                "request_limit": query.request_limit(),
            });
            Ok(serde_json::to_string_pretty(&output)?)
        }
        _ => Ok(key.to_string()),
    }
}
