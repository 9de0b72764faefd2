//! Instruction template for VLM image captioning.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth** — adjusting how captions are requested
//!    (output shape, how context is weighed) means editing exactly one place.
//!
//! 2. **Testability** — unit tests inspect the assembled prompt directly
//!    without spinning up a VLM, so template regressions are cheap to catch.

/// Build the captioning instruction for one image.
///
/// The template states the task (caption + key identifying elements + an
/// inferred title), cites the source caption as a hint when one exists,
/// supplies the surrounding page text with an instruction to keep only what
/// is relevant to the image, and mandates the `title--description` output
/// shape the reassembler stores verbatim.
pub fn caption_instruction(context: &str, hint: Option<&str>) -> String {
    let hint_line = match hint {
        Some(h) if !h.is_empty() => format!("The image's source caption is: {h}\n"),
        _ => String::new(),
    };

    format!(
        "Describe this image: identify its key distinguishing elements and infer a likely title.\n\
         {hint_line}\
         Reference text from the surrounding pages: {context}\n\
         Use only the parts of the reference text that are actually about the image.\n\
         Be concise; do not describe layout. Output format: title--description."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_context_and_output_shape() {
        let p = caption_instruction("nearby text", None);
        assert!(p.contains("nearby text"));
        assert!(p.contains("title--description"));
    }

    #[test]
    fn hint_appears_only_when_present() {
        let with = caption_instruction("ctx", Some("Figure 3: results"));
        assert!(with.contains("Figure 3: results"));

        let without = caption_instruction("ctx", None);
        assert!(!without.contains("source caption"));

        let empty = caption_instruction("ctx", Some(""));
        assert!(!empty.contains("source caption"));
    }
}
