use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://blackboard.unist.ac.kr/";
const GRADES_PATH: &str =
    "webapps/bb-social-learning-BB5a8801a04ee83/execute/mybb?cmd=display&toolId=MyGradesOnMyBb_____MyGradesTool";
const DEFAULT_OUTPUT: &str = "courses_data.json";

// Login credentials for the portal, handed explicitly to the login flow.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub executable: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub cookie_dialog: Duration,
    pub login_navigation: Duration,
    pub course_list: Duration,
    pub grades_wrapper: Duration,
    pub frame_discovery: Duration,
    pub frame_navigation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cookie_dialog: Duration::from_secs(5),
            login_navigation: Duration::from_secs(30),
            course_list: Duration::from_secs(10),
            grades_wrapper: Duration::from_secs(10),
            frame_discovery: Duration::from_secs(30),
            frame_navigation: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub base_url: Url,
    pub grades_url: Url,
    pub output: PathBuf,
    pub browser: BrowserOptions,
    pub timeouts: Timeouts,
}

impl Config {
    // Builds the configuration from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup("USERNAME").context("USERNAME environment variable not found")?;
        let password = lookup("PASSWORD").context("PASSWORD environment variable not found")?;

        let base = lookup("BB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).with_context(|| format!("Invalid BB_BASE_URL: {base}"))?;
        let grades_url = base_url
            .join(GRADES_PATH)
            .context("Failed to build the grades overview URL")?;

        let output = lookup("BB_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let headless = match lookup("BB_HEADLESS") {
            Some(value) => parse_flag(&value)
                .with_context(|| format!("BB_HEADLESS must be true or false, got {value:?}"))?,
            None => true,
        };

        Ok(Self {
            credentials: Credentials { username, password },
            base_url,
            grades_url,
            output,
            browser: BrowserOptions {
                headless,
                executable: lookup("CHROME_PATH").map(PathBuf::from),
            },
            timeouts: Timeouts::default(),
        })
    }

    // Resolves a relative detail path captured from the summary widget against the portal origin.
    pub fn detail_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid grade detail path: {path}"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_point_at_the_portal() {
        let config = config_with(&[("USERNAME", "student"), ("PASSWORD", "secret")]).unwrap();
        assert_eq!(config.credentials.username, "student");
        assert_eq!(config.base_url.as_str(), DEFAULT_BASE_URL);
        assert!(config
            .grades_url
            .as_str()
            .ends_with("toolId=MyGradesOnMyBb_____MyGradesTool"));
        assert_eq!(config.output, PathBuf::from("courses_data.json"));
        assert!(config.browser.headless);
        assert!(config.browser.executable.is_none());
        assert_eq!(config.timeouts.grades_wrapper, Duration::from_secs(10));
        assert_eq!(config.timeouts.login_navigation, Duration::from_secs(30));
    }

    #[test]
    fn missing_password_is_reported() {
        let err = config_with(&[("USERNAME", "student")]).unwrap_err();
        assert!(err.to_string().contains("PASSWORD"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_with(&[
            ("USERNAME", "student"),
            ("PASSWORD", "secret"),
            ("BB_BASE_URL", "http://localhost:8080/"),
            ("BB_OUTPUT", "out/grades.json"),
            ("BB_HEADLESS", "false"),
            ("CHROME_PATH", "/usr/bin/chromium"),
        ])
        .unwrap();
        assert!(config.grades_url.as_str().starts_with("http://localhost:8080/webapps/"));
        assert_eq!(config.output, PathBuf::from("out/grades.json"));
        assert!(!config.browser.headless);
        assert_eq!(
            config.browser.executable,
            Some(PathBuf::from("/usr/bin/chromium"))
        );
    }

    #[test]
    fn bad_headless_flag_is_rejected() {
        let err = config_with(&[
            ("USERNAME", "student"),
            ("PASSWORD", "secret"),
            ("BB_HEADLESS", "maybe"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("BB_HEADLESS"));
    }

    #[test]
    fn detail_url_resolves_against_origin() {
        let config = config_with(&[("USERNAME", "student"), ("PASSWORD", "secret")]).unwrap();
        let absolute = config
            .detail_url("/webapps/bb-mygrades-BBLEARN/myGrades?course_id=_42_1")
            .unwrap();
        assert_eq!(
            absolute.as_str(),
            "https://blackboard.unist.ac.kr/webapps/bb-mygrades-BBLEARN/myGrades?course_id=_42_1"
        );
        let relative = config.detail_url("webapps/x?y=1").unwrap();
        assert_eq!(relative.as_str(), "https://blackboard.unist.ac.kr/webapps/x?y=1");
    }

    #[test]
    fn debug_output_hides_password() {
        let config = config_with(&[("USERNAME", "student"), ("PASSWORD", "secret")]).unwrap();
        let debug = format!("{:?}", config.credentials);
        assert!(!debug.contains("secret"));
    }
}
