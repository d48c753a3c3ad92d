//! Per-listener options, in the server's `key=value` module-argument
//! convention.

use std::path::PathBuf;
use std::sync::Arc;

use crate::server::cookie::AuthCookie;
use crate::server::ip_acl::IpAcl;

/// Everything configurable about a native-protocol endpoint.
#[derive(Debug, Clone)]
pub struct NativeOptions {
    /// Offer the shared-ringbuffer fast path to capable clients.
    pub srbchannel: bool,

    /// Grant access without any credential check.
    pub auth_anonymous: bool,

    /// Grant access to local members of `auth_group`.
    pub auth_group_enabled: bool,
    pub auth_group: Option<String>,

    /// Grant access to TCP peers matching the list.
    pub auth_ip_acl: IpAcl,

    /// Check the shared-secret cookie.
    pub auth_cookie_enabled: bool,

    /// Where the cookie lives; resolved against the environment when
    /// unset.
    pub auth_cookie_path: Option<PathBuf>,

    /// The loaded cookie, shared by every connection.
    pub cookie: Option<Arc<AuthCookie>>,
}

impl Default for NativeOptions {
    fn default() -> Self {
        Self {
            srbchannel: true,
            auth_anonymous: false,
            auth_group_enabled: false,
            auth_group: None,
            auth_ip_acl: IpAcl::default(),
            auth_cookie_enabled: true,
            auth_cookie_path: None,
            cookie: None,
        }
    }
}

impl NativeOptions {
    /// Parses a module-argument string, e.g.
    /// `auth-anonymous=1 auth-ip-acl=127.0.0.1;10.0.0.0/8`.
    ///
    /// List values use `;` or `,` as separators. Unknown keys fail, like
    /// they would fail a module load.
    pub fn parse(args: &str) -> Result<Self, String> {
        let mut options = Self::default();

        for pair in args.split_whitespace() {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;

            match key {
                "srbchannel" => options.srbchannel = parse_bool(value)?,
                "auth-anonymous" => options.auth_anonymous = parse_bool(value)?,
                "auth-group-enable" => options.auth_group_enabled = parse_bool(value)?,
                "auth-group" => options.auth_group = Some(value.to_string()),
                "auth-ip-acl" => {
                    options.auth_ip_acl = value.replace(';', ",").parse()?;
                }
                "auth-cookie-enabled" => options.auth_cookie_enabled = parse_bool(value)?,
                "auth-cookie" | "cookie" => {
                    options.auth_cookie_path = Some(PathBuf::from(value));
                }
                _ => return Err(format!("unknown option '{}'", key)),
            }
        }

        Ok(options)
    }

    /// Loads (or generates) the cookie, if cookie auth is enabled and no
    /// cookie has been injected yet. The explicit path wins; otherwise the
    /// usual environment locations are searched, falling back to
    /// `fallback_dir`.
    pub fn load_cookie(&mut self, fallback_dir: &std::path::Path) -> std::io::Result<()> {
        if !self.auth_cookie_enabled || self.cookie.is_some() {
            return Ok(());
        }

        let path = self
            .auth_cookie_path
            .clone()
            .or_else(crate::cookie_path_from_env)
            .unwrap_or_else(|| fallback_dir.join("cookie"));

        self.cookie = Some(Arc::new(AuthCookie::load_or_create(path)?));
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "1" | "y" | "yes" | "t" | "true" | "on" => Ok(true),
        "0" | "n" | "no" | "f" | "false" | "off" => Ok(false),
        other => Err(format!("invalid boolean '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_full_option_set() {
        let options = NativeOptions::parse(
            "srbchannel=0 auth-anonymous=1 auth-group-enable=yes auth-group=audio \
             auth-ip-acl=127.0.0.1;10.0.0.0/8 auth-cookie-enabled=true cookie=/tmp/c",
        )
        .unwrap();

        assert!(!options.srbchannel);
        assert!(options.auth_anonymous);
        assert!(options.auth_group_enabled);
        assert_eq!(options.auth_group.as_deref(), Some("audio"));
        assert!(options.auth_ip_acl.check("10.1.2.3".parse().unwrap()));
        assert!(options.auth_cookie_enabled);
        assert_eq!(
            options.auth_cookie_path,
            Some(PathBuf::from("/tmp/c"))
        );
    }

    #[test]
    fn defaults_match_an_empty_argument_string() {
        let options = NativeOptions::parse("").unwrap();

        assert!(options.srbchannel);
        assert!(!options.auth_anonymous);
        assert!(options.auth_cookie_enabled);
        assert!(options.auth_ip_acl.is_empty());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_booleans() {
        assert!(NativeOptions::parse("frobnicate=1").is_err());
        assert!(NativeOptions::parse("srbchannel=maybe").is_err());
    }
}
