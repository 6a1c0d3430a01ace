use aliri_braid::braid;
use std::fmt;

// Secret-bearing braids render as a fixed placeholder; the alternate
// form reveals at most a short prefix so log lines stay safe while two
// values remain distinguishable by eye. A format width overrides the
// default prefix length.
macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn reveal_prefix(secret: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        return f.write_str("…");
    }
    if max_len > secret.len() {
        return f.write_str(secret);
    }
    // Truncate on a character boundary, leaving room for the ellipsis.
    match secret.char_indices().nth(max_len - 2) {
        Some((idx, c)) if idx + c.len_utf8() < secret.len() => {
            f.write_str(&secret[..idx + c.len_utf8()])?;
            f.write_str("…")
        }
        _ => f.write_str(secret),
    }
}

/// The name a principal logs in with
#[braid(serde)]
pub struct Username;

/// The shared secret presented alongside the username at login
#[braid(serde, debug = "owned", display = "owned")]
pub struct ApiKey;

limited_reveal!(ApiKeyRef: "API KEY", 5);

/// An opaque session token issued by the provider at login
#[braid(serde, debug = "owned", display = "owned")]
pub struct SessionToken;

limited_reveal!(SessionTokenRef: "SESSION TOKEN", 15);
