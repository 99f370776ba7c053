use hyper::Request;
use hyper::header::AUTHORIZATION;

/// Static bearer token check for the admin API
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn is_authenticated<B>(&self, req: &Request<B>) -> bool {
        let auth_str = match req.headers().get(AUTHORIZATION).map(|h| h.to_str()) {
            Some(Ok(s)) => s,
            _ => return false,
        };

        match auth_str.strip_prefix("Bearer ") {
            // An empty configured token never authenticates anyone
            Some(presented) if !self.token.is_empty() => {
                constant_time_compare(presented.trim(), &self.token)
            }
            _ => false,
        }
    }
}

/// Length is not hidden, content is
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
