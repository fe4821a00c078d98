use common::error::AppError;
use serde::de::DeserializeOwned;

/// Pull the first well-formed JSON value of type `T` out of a model response.
///
/// Models wrap payloads in prose or code fences, so every `{` / `[` is tried as a
/// start position until one deserializes.
pub fn extract_json_payload<T: DeserializeOwned>(text: &str) -> Result<T, AppError> {
    let mut last_error = None;

    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let Some(candidate) = text.get(start..) else {
            continue;
        };

        let mut stream =
            serde_json::Deserializer::from_str(candidate).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(value)) => match serde_json::from_value::<T>(value) {
                Ok(parsed) => return Ok(parsed),
                Err(err) => last_error = Some(err.to_string()),
            },
            Some(Err(err)) => last_error = Some(err.to_string()),
            None => {}
        }
    }

    Err(AppError::LLMParsing(match last_error {
        Some(err) => format!("no usable JSON payload in model output: {err}"),
        None => "no JSON payload in model output".to_string(),
    }))
}
