//! Command helpers for the fake SMTP server.
//!
//! SMTP commands are single CRLF-terminated lines. Replies start with
//! a three digit code; multi-line replies use `-` after the code on
//! every line but the last.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

/// EHLO reply advertising only `AUTH PLAIN`.
pub const EHLO_REPLY: &str = "250-fake.smtp Hello\r\n250-AUTH PLAIN\r\n250 8BITMIME\r\n";

/// EHLO reply before TLS: the only extension offered is STARTTLS.
pub const EHLO_PLAIN_REPLY: &str = "250-fake.smtp Hello\r\n250 STARTTLS\r\n";

/// Extract the address from `MAIL FROM:<a@b> PARAMS` or `RCPT TO:<a@b>`.
pub fn parse_path(arg: &str) -> Option<String> {
    let start = arg.find('<')?;
    let end = arg[start..].find('>')? + start;
    Some(arg[start + 1..end].to_string())
}

/// Check a base64 `AUTH PLAIN` response (`authzid\0user\0pass`).
pub fn check_plain(response: &str, username: &str, password: &str) -> bool {
    let Ok(decoded) = STANDARD.decode(response.trim()) else {
        return false;
    };
    let parts: Vec<&[u8]> = decoded.split(|b| *b == 0).collect();
    parts.len() == 3 && parts[1] == username.as_bytes() && parts[2] == password.as_bytes()
}

/// Read a DATA payload up to the lone `.` line, undoing dot-stuffing.
/// Returns `None` if the client hangs up first.
pub async fn read_data<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        let mut line = Vec::new();
        match stream.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        if line == b".\r\n" || line == b".\n" {
            return Some(data);
        }
        let unstuffed = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
        data.extend_from_slice(unstuffed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn paths_ignore_parameters() {
        assert_eq!(parse_path("FROM:<a@b.com> BODY=8BITMIME").as_deref(), Some("a@b.com"));
        assert_eq!(parse_path("TO:<>").as_deref(), Some(""));
        assert_eq!(parse_path("TO:a@b.com"), None);
    }

    #[test]
    fn plain_credentials() {
        let good = STANDARD.encode(b"\0user\0secret");
        assert!(check_plain(&good, "user", "secret"));
        assert!(!check_plain(&good, "user", "wrong"));
        assert!(!check_plain("not base64!", "user", "secret"));
    }

    #[tokio::test]
    async fn data_is_unstuffed() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"Subject: x\r\n\r\n..leading dot\r\nend\r\n.\r\n")
            .await
            .unwrap();

        let mut stream = BufReader::new(server);
        let data = read_data(&mut stream).await.unwrap();
        assert_eq!(data, b"Subject: x\r\n\r\n.leading dot\r\nend\r\n");
    }
}
