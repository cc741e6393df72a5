//! Client recognition from the `User-Agent` header.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Facts about the client that sent a request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ClientFacts {
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub device: String,
    pub device_type: String,
}

/// Derives [`ClientFacts`] from a user agent.
pub trait ClientResolver: Send + Sync + fmt::Debug {
    /// Returns `None` if the client is not recognized or is a bot.
    fn resolve(&self, user_agent: Option<&str>) -> Option<ClientFacts>;
}

fn pattern(regex: &str) -> Regex {
    Regex::new(regex).unwrap()
}

static BOT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)bot\b|crawl|spider|slurp|headless|lighthouse|pingdom|phantomjs|curl/|wget/")
});

/// Browsers and native HTTP stacks. Order matters: the first match wins.
static BROWSERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (pattern(r"Edg(?:e|A|iOS)?/([\d.]+)"), "Edge"),
        (pattern(r"(?:OPR|Opera)/([\d.]+)"), "Opera"),
        (pattern(r"SamsungBrowser/([\d.]+)"), "Samsung Internet"),
        (pattern(r"YaBrowser/([\d.]+)"), "Yandex Browser"),
        (pattern(r"(?:Chrome|CriOS)/([\d.]+)"), "Chrome"),
        (pattern(r"(?:Firefox|FxiOS)/([\d.]+)"), "Firefox"),
        (pattern(r"Version/([\d.]+).*Safari/"), "Safari"),
        (pattern(r"MSIE ([\d.]+)"), "IE"),
        (pattern(r"Trident/.*rv:([\d.]+)"), "IE"),
        (pattern(r"CFNetwork/([\d.]+)"), "CFNetwork"),
        (pattern(r"okhttp/([\d.]+)"), "okhttp"),
        (pattern(r"Dalvik/([\d.]+)"), "Dalvik"),
    ]
});

static OPERATING_SYSTEMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (pattern(r"Windows NT ([\d.]+)"), "Windows"),
        (pattern(r"(?:iPhone|iPad|iPod).*? OS ([\d_]+)"), "iOS"),
        (pattern(r"Android ([\d.]+)"), "Android"),
        (pattern(r"Android"), "Android"),
        (pattern(r"CrOS \S+ ([\d.]+)"), "Chrome OS"),
        (pattern(r"Mac OS X ([\d_.]+)"), "Mac OS X"),
        (pattern(r"Darwin/([\d.]+)"), "iOS"),
        (pattern(r"Linux"), "Linux"),
    ]
});

/// Resolves clients with a fixed table of user agent patterns.
#[derive(Debug, Default)]
pub struct UserAgentResolver;

impl UserAgentResolver {
    fn first_match(table: &[(Regex, &'static str)], user_agent: &str) -> Option<(String, String)> {
        table.iter().find_map(|(regex, name)| {
            let captures = regex.captures(user_agent)?;
            let version = captures
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map_or(String::new(), |m| m.as_str().replace('_', "."));
            Some(((*name).to_owned(), version))
        })
    }

    fn device(user_agent: &str) -> (String, String) {
        let (device, device_type) = if user_agent.contains("iPad") {
            ("iPad", "tablet")
        } else if user_agent.contains("iPhone") {
            ("iPhone", "mobile")
        } else if user_agent.contains("iPod") {
            ("iPod", "mobile")
        } else if user_agent.contains("Android") {
            if user_agent.contains("Mobile") {
                ("", "mobile")
            } else {
                ("", "tablet")
            }
        } else {
            ("", "desktop")
        };

        (device.to_owned(), device_type.to_owned())
    }
}

impl ClientResolver for UserAgentResolver {
    fn resolve(&self, user_agent: Option<&str>) -> Option<ClientFacts> {
        let user_agent = user_agent.map(str::trim).filter(|ua| !ua.is_empty())?;
        if BOT_REGEX.is_match(user_agent) {
            return None;
        }

        let (browser, browser_version) = Self::first_match(&BROWSERS, user_agent)?;
        let (os, os_version) = Self::first_match(&OPERATING_SYSTEMS, user_agent).unwrap_or_default();
        let (device, device_type) = Self::device(user_agent);

        Some(ClientFacts {
            os,
            os_version,
            browser,
            browser_version,
            device,
            device_type,
        })
    }
}

/// Maps an Apple machine identifier such as `iPhone14,2` to its marketing name.
///
/// Unknown identifiers are returned unchanged.
pub fn map_ios_device(identifier: &str) -> &str {
    match identifier {
        "iPhone10,1" | "iPhone10,4" => "iPhone 8",
        "iPhone10,2" | "iPhone10,5" => "iPhone 8 Plus",
        "iPhone10,3" | "iPhone10,6" => "iPhone X",
        "iPhone11,2" => "iPhone XS",
        "iPhone11,4" | "iPhone11,6" => "iPhone XS Max",
        "iPhone11,8" => "iPhone XR",
        "iPhone12,1" => "iPhone 11",
        "iPhone12,3" => "iPhone 11 Pro",
        "iPhone12,5" => "iPhone 11 Pro Max",
        "iPhone12,8" => "iPhone SE (2nd generation)",
        "iPhone13,1" => "iPhone 12 mini",
        "iPhone13,2" => "iPhone 12",
        "iPhone13,3" => "iPhone 12 Pro",
        "iPhone13,4" => "iPhone 12 Pro Max",
        "iPhone14,2" => "iPhone 13 Pro",
        "iPhone14,3" => "iPhone 13 Pro Max",
        "iPhone14,4" => "iPhone 13 mini",
        "iPhone14,5" => "iPhone 13",
        "iPhone14,6" => "iPhone SE (3rd generation)",
        "iPhone14,7" => "iPhone 14",
        "iPhone14,8" => "iPhone 14 Plus",
        "iPhone15,2" => "iPhone 14 Pro",
        "iPhone15,3" => "iPhone 14 Pro Max",
        "iPhone15,4" => "iPhone 15",
        "iPhone15,5" => "iPhone 15 Plus",
        "iPhone16,1" => "iPhone 15 Pro",
        "iPhone16,2" => "iPhone 15 Pro Max",
        "iPhone17,1" => "iPhone 16 Pro",
        "iPhone17,2" => "iPhone 16 Pro Max",
        "iPhone17,3" => "iPhone 16",
        "iPhone17,4" => "iPhone 16 Plus",
        "iPad13,18" | "iPad13,19" => "iPad (10th generation)",
        "iPad13,1" | "iPad13,2" => "iPad Air (4th generation)",
        "iPad13,16" | "iPad13,17" => "iPad Air (5th generation)",
        "iPad14,1" | "iPad14,2" => "iPad mini (6th generation)",
        "iPad14,3" | "iPad14,4" => "iPad Pro 11-inch (4th generation)",
        "iPad14,5" | "iPad14,6" => "iPad Pro 12.9-inch (6th generation)",
        "i386" | "x86_64" | "arm64" => "Simulator",
        other => other,
    }
}

/// Returns `tablet` for iPads and `mobile` for every other Apple device.
pub fn ios_device_type(identifier: &str) -> &'static str {
    if identifier.starts_with("iPad") {
        "tablet"
    } else {
        "mobile"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_chrome_desktop() {
        let facts = UserAgentResolver.resolve(Some(CHROME_MAC)).unwrap();
        assert_eq!(facts.browser, "Chrome");
        assert_eq!(facts.browser_version, "124.0.0.0");
        assert_eq!(facts.os, "Mac OS X");
        assert_eq!(facts.os_version, "10.15.7");
        assert_eq!(facts.device_type, "desktop");
    }

    #[test]
    fn test_safari_iphone() {
        let facts = UserAgentResolver.resolve(Some(SAFARI_IPHONE)).unwrap();
        assert_eq!(facts.browser, "Safari");
        assert_eq!(facts.os, "iOS");
        assert_eq!(facts.os_version, "17.4");
        assert_eq!(facts.device, "iPhone");
        assert_eq!(facts.device_type, "mobile");
    }

    #[test]
    fn test_native_ios_client() {
        let facts = UserAgentResolver
            .resolve(Some("Shop/3.2 CFNetwork/1490.0.4 Darwin/23.2.0"))
            .unwrap();
        assert_eq!(facts.browser, "CFNetwork");
        assert_eq!(facts.os, "iOS");
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(UserAgentResolver.resolve(None), None);
        assert_eq!(UserAgentResolver.resolve(Some("  ")), None);
        assert_eq!(UserAgentResolver.resolve(Some("definitely-not-a-browser")), None);
        assert_eq!(
            UserAgentResolver.resolve(Some(
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
            )),
            None
        );
        assert_eq!(
            UserAgentResolver.resolve(Some(
                "Mozilla/5.0 (X11; Linux x86_64) HeadlessChrome/120.0.0.0 Safari/537.36"
            )),
            None
        );
    }

    #[test]
    fn test_ios_devices() {
        assert_eq!(map_ios_device("iPhone14,2"), "iPhone 13 Pro");
        assert_eq!(map_ios_device("iPhone99,9"), "iPhone99,9");
        assert_eq!(ios_device_type("iPad13,18"), "tablet");
        assert_eq!(ios_device_type("iPhone14,2"), "mobile");
    }
}
