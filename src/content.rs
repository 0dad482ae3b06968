//! Content negotiation over coap-lite's registered content formats.

use coap_lite::ContentFormat;
use coap_lite::option_value::OptionValueU16;

/// Accept values that are answered with a SenML pack.
pub fn is_senml(accept: Option<ContentFormat>) -> bool {
    matches!(
        accept,
        Some(ContentFormat::ApplicationSenmlJSON | ContentFormat::ApplicationJSON)
    )
}

/// Accept option value asking for `format`.
pub fn accept_option(format: ContentFormat) -> OptionValueU16 {
    // Registered content-format numbers stop at 30000.
    OptionValueU16(usize::from(format) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_senml() {
        assert!(is_senml(Some(ContentFormat::ApplicationSenmlJSON)));
        assert!(is_senml(Some(ContentFormat::ApplicationJSON)));
        assert!(!is_senml(Some(ContentFormat::TextPlain)));
        assert!(!is_senml(Some(ContentFormat::ApplicationCBOR)));
        assert!(!is_senml(None));
    }

    #[test]
    fn test_accept_option_carries_registry_number() {
        assert_eq!(accept_option(ContentFormat::ApplicationSenmlJSON).0, 110);
        assert_eq!(accept_option(ContentFormat::TextPlain).0, 0);
    }
}
