//! URL handling for attribute-triggered fetches.
//!
//! References are resolved and serialized with the WHATWG parser so that a
//! replayed fetch names a resource exactly the way the browser that
//! recorded the session did.

use url::Url;

/// Resolve `reference` against the document URL `base`
///
/// Returns `None` when neither the joined URL nor `reference` on its own
/// parses, e.g. a relative reference inside an `about:blank` document.
#[must_use]
pub fn resolve_url(base: &str, reference: &str) -> Option<Url> {
    match Url::parse(base) {
        Ok(base) => base.join(reference).ok(),
        Err(_) => Url::parse(reference).ok(),
    }
}

/// Whether a resolved URL would go over the network
#[must_use]
pub fn is_fetchable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Serialized form of `url` without its fragment
///
/// Unparseable input is kept verbatim, minus any fragment.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.split_once('#').map_or(url, |(before, _)| before).to_string(),
    }
}
