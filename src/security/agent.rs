//! User-agent classification.
//!
//! Pure, stateless verdict on a raw User-Agent header. Evaluation runs in
//! four ordered layers, first match wins:
//!
//! 1. missing header → blocked outright
//! 2. allowlisted crawler → identified as a bot but let through
//! 3. blocklisted automation signature → blocked
//! 4. otherwise the string must carry a genuine browser-engine token
//!
//! The allowlist is checked before the blocklist on purpose: "Googlebot"
//! contains the generic "bot" token and must still pass.

use serde::Serialize;

/// Known legitimate crawlers (search engines, social link previews).
const ALLOWED_CRAWLERS: &[&str] = &[
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "applebot",
    "facebookexternalhit",
    "twitterbot",
    "linkedinbot",
    "pinterestbot",
    "telegrambot",
    "whatsapp",
    "discordbot",
    "slackbot",
];

/// Known automation signatures: HTTP libraries, headless browsers,
/// scraping frameworks, scanners, AI-training crawlers, and generic
/// bot tokens.
const AUTOMATION_SIGNATURES: &[&str] = &[
    // HTTP client libraries
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "go-http-client",
    "okhttp",
    "java/",
    "libwww-perl",
    "httpclient",
    "axios",
    "node-fetch",
    // Headless browsers and automation frameworks
    "headlesschrome",
    "phantomjs",
    "puppeteer",
    "playwright",
    "selenium",
    "scrapy",
    "mechanize",
    // Scanners
    "nikto",
    "sqlmap",
    "nmap",
    "masscan",
    "zgrab",
    "nuclei",
    // AI-training crawlers
    "gptbot",
    "ccbot",
    "claudebot",
    "bytespider",
    "amazonbot",
    "petalbot",
    // Generic automation tokens
    "bot",
    "crawler",
    "spider",
    "scraper",
];

/// Tokens a genuine browser user-agent is expected to carry.
const BROWSER_TOKENS: &[&str] = &[
    "mozilla", "chrome", "safari", "firefox", "edge", "opera", "webkit", "gecko",
];

/// How confident the classifier is in its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Which layer produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedRule {
    /// No User-Agent header at all.
    MissingHeader,
    /// Matched the crawler allowlist.
    Allowlist,
    /// Matched the automation blocklist.
    Blocklist,
    /// Carried no recognizable browser-engine token.
    NoBrowserToken,
    /// Looked like a genuine browser.
    BrowserToken,
}

/// Verdict on a single request's user agent. Derived per request, never
/// persisted.
#[derive(Debug, Clone)]
pub struct Classification {
    pub is_bot: bool,
    pub should_block: bool,
    pub confidence: Confidence,
    pub rule: MatchedRule,
    /// Human-readable match context, logged for offline list tuning.
    pub reason: String,
}

/// Classify a raw User-Agent header value. Pure function, no I/O.
pub fn classify(user_agent: Option<&str>) -> Classification {
    let Some(agent) = user_agent else {
        return Classification {
            is_bot: true,
            should_block: true,
            confidence: Confidence::High,
            rule: MatchedRule::MissingHeader,
            reason: "missing user-agent header".to_string(),
        };
    };
    let lowered = agent.to_lowercase();

    if let Some(token) = first_match(&lowered, ALLOWED_CRAWLERS) {
        return Classification {
            is_bot: true,
            should_block: false,
            confidence: Confidence::High,
            rule: MatchedRule::Allowlist,
            reason: format!("allowlisted crawler \"{token}\""),
        };
    }

    if let Some(token) = first_match(&lowered, AUTOMATION_SIGNATURES) {
        return Classification {
            is_bot: true,
            should_block: true,
            confidence: Confidence::High,
            rule: MatchedRule::Blocklist,
            reason: format!("automation signature \"{token}\""),
        };
    }

    match first_match(&lowered, BROWSER_TOKENS) {
        Some(token) => Classification {
            is_bot: false,
            should_block: false,
            confidence: Confidence::High,
            rule: MatchedRule::BrowserToken,
            reason: format!("browser token \"{token}\""),
        },
        None => Classification {
            is_bot: true,
            should_block: true,
            confidence: Confidence::Medium,
            rule: MatchedRule::NoBrowserToken,
            reason: "no browser engine token".to_string(),
        },
    }
}

fn first_match<'a>(lowered_agent: &str, tokens: &[&'a str]) -> Option<&'a str> {
    tokens.iter().copied().find(|t| lowered_agent.contains(t))
}
