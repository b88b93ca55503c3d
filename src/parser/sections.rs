use std::sync::LazyLock;

use regex::Regex;

static LD_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<script\b[^>]*\btype\s*=\s*["']?\s*application/ld\+json\s*["']?[^>]*>(.*?)</script\s*>"#,
    )
    .unwrap()
});

/// Pull the raw text of every LD-JSON script element out of `html`, in
/// document order. The content is returned untouched; nothing is parsed here.
pub fn extract_ld_json_sections(html: &str) -> Vec<String> {
    LD_JSON_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

// ── Tests ──
