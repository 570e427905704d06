//! Line filters applied before records reach the store

/// User-agent keywords of crawlers, feed readers and scripted clients
const BOT_KEYWORDS: &[&str] = &[
    "bot", "Bot", "crawler", "Crawler", "spider", "Spider", "http-client", "curl",
    "check_http", "Miniflux", "Feedly", "okhttp", "Zapier",
];

/// Extensions of resources loaded by a page rather than navigated to
const STATIC_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".ico", ".svg", ".woff", ".woff2", ".ttf", ".eot", ".otf", ".map", ".feed",
];

/// A keyword counts only when it ends a word: "Googlebot/2.1" is a bot,
/// "Bottle" is not.
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    BOT_KEYWORDS.iter().any(|word| {
        user_agent.match_indices(word).any(|(idx, _)| {
            user_agent[idx + word.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric())
        })
    })
}

pub fn is_static_asset(path: &str) -> bool {
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Canonical form of a page path: `/docs/index.html`, `/docs/` and `/docs`
/// are the same page. The root stays `/`.
pub fn normalize_path(path: &str) -> &str {
    let path = match path.strip_suffix("index.html") {
        Some(dir) if dir.ends_with('/') => dir,
        _ => path,
    };
    match path.strip_suffix('/') {
        Some("") | None => path,
        Some(trimmed) => trimmed,
    }
}
