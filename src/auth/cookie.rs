//! Session cookie headers.

/// Default session cookie name.
pub const SESSION_COOKIE_NAME: &str = "session";

/// Build a `Set-Cookie` value that hands `value` to the browser.
#[must_use]
pub fn format_set_cookie(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; Max-Age={max_age}; HttpOnly{secure_flag}; SameSite=Strict")
}

/// Build a `Set-Cookie` value that makes the browser drop the cookie.
///
/// This is the only form of logout: the credential itself stays valid until
/// it expires.
#[must_use]
pub fn format_clear_cookie(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0; HttpOnly; Secure; SameSite=Strict")
}

/// Find the value of cookie `name` in a `Cookie` request header.
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}
