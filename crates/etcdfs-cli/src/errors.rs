//! Error reporting for the command line.

use std::error::Error;

/// Render an error and its source chain on one line.
pub fn format_error(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Print an error to stderr.
pub fn print_error(err: &dyn Error) {
    eprintln!("etcdfs: {}", format_error(err));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "cannot reach etcd")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_format_error_includes_sources() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(format_error(&err), "cannot reach etcd: connection refused");
    }

    #[test]
    fn test_format_error_skips_repeated_text() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(format_error(&err), "boom");
    }
}
