//! The mock Identity Provider: key material, Response construction and
//! signing, and the IdP's own metadata.

mod c14n;
pub mod keys;
pub mod metadata;
pub mod response;
pub mod signer;

/// Escape text for use in XML content and double-quoted attributes.
pub(crate) fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}
