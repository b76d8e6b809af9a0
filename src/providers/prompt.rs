//! Prompt construction and model-output parsing shared by all providers.
//!
//! Every backend gets the same prompt and the same lenient JSON extraction:
//! chat models like to wrap their answer in prose or code fences, so we take
//! the outermost `{ ... }` span rather than demanding clean JSON.

use super::{ImageMetadata, MediaContext, ProviderError, MAX_ALT_TEXT, MAX_CAPTION, MAX_DESCRIPTION, MAX_TITLE};

/// Appended for completion-style backends that tend to ramble.
pub const JSON_ONLY_SUFFIX: &str = "\n\nRespond with a single valid JSON object and nothing else.";

/// Build the generation prompt for one image.
pub fn build_prompt(context: &MediaContext, language: &str) -> String {
    format!(
        "Generate SEO metadata for this WordPress image.\n\
         \n\
         Context:\n\
         - Page title: {page_title}\n\
         - Page content: {page_content}\n\
         - Image title: {image_title}\n\
         - Image URL: {image_url}\n\
         \n\
         Write the output in the language with tag \"{language}\" as a JSON object with:\n\
         - alt_text: precise description of the image (max {alt} chars)\n\
         - title: SEO title (max {title} chars)\n\
         - caption: engaging caption (max {caption} chars)\n\
         - description: detailed description (max {desc} chars)\n\
         \n\
         JSON format only:\n\
         {{\n\
             \"alt_text\": \"...\",\n\
             \"title\": \"...\",\n\
             \"caption\": \"...\",\n\
             \"description\": \"...\"\n\
         }}",
        page_title = context.page_title,
        page_content = context.page_content,
        image_title = context.image_title,
        image_url = context.image_url,
        language = language,
        alt = MAX_ALT_TEXT,
        title = MAX_TITLE,
        caption = MAX_CAPTION,
        desc = MAX_DESCRIPTION,
    )
}

/// Extract the outermost JSON object from model output.
///
/// Returns the `{ ... }` span between the first `{` and the last `}`, or
/// `None` when the text holds no such span.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse model output into validated, length-capped metadata.
pub fn parse_metadata(text: &str) -> Result<ImageMetadata, ProviderError> {
    let json = extract_json(text).ok_or(ProviderError::Malformed)?;
    let metadata: ImageMetadata =
        serde_json::from_str(json).map_err(|_| ProviderError::Malformed)?;
    metadata.enforce_limits().validate()
}
