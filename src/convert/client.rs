use std::future::Future;

use serde::Deserialize;

use crate::settings::ConverterSettings;

use super::error::{ConversionError, ConversionResult};

/// Anything that can turn a batch into its converted counterpart.
pub trait Converter {
    fn convert(&self, text: &str) -> impl Future<Output = ConversionResult<String>> + Send;
}

/// Collapse runs of newlines into one and trim the ends. The segment
/// separator is not whitespace, so it survives untouched.
pub fn normalize_batch(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_newline = false;
    for c in text.chars() {
        if c == '\n' {
            if last_was_newline {
                continue;
            }
            last_was_newline = true;
        } else {
            last_was_newline = false;
        }
        out.push(c);
    }
    out.trim().to_string()
}

#[derive(Deserialize)]
struct ConvertResponse {
    data: ConvertData,
}

#[derive(Deserialize)]
struct ConvertData {
    text: String,
}

/// Pull the converted text out of a response body (`data.text`).
pub fn parse_response(body: &str) -> ConversionResult<String> {
    let parsed: ConvertResponse = serde_json::from_str(body)
        .map_err(|err| ConversionError::MalformedResponse(err.to_string()))?;
    Ok(parsed.data.text)
}

/// HTTP client for the zhconvert-style conversion endpoint.
#[derive(Clone)]
pub struct ZhConvertClient {
    client: reqwest::Client,
    endpoint: String,
    profile: String,
}

impl ZhConvertClient {
    pub fn new(settings: &ConverterSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            profile: settings.profile.clone(),
        }
    }
}

impl Converter for ZhConvertClient {
    async fn convert(&self, text: &str) -> ConversionResult<String> {
        let cleaned = normalize_batch(text);

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("text", cleaned.as_str()), ("converter", self.profile.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ConversionError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|err| ConversionError::MalformedResponse(err.to_string()))?;
        parse_response(&body)
    }
}
