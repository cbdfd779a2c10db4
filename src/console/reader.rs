//! Line stream reader for a child's stdout.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Read `stream` line by line until EOF, calling `on_line` for each line in
/// order. Trailing `\r` is stripped and invalid UTF-8 is replaced, so a stray
/// byte never ends the loop. Returns the number of lines delivered.
pub async fn read_lines<R, F>(stream: R, mut on_line: F) -> u64
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    let mut delivered = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf);
                on_line(&line);
                delivered += 1;
            }
            Err(e) => {
                tracing::warn!("Console stream read failed: {}", e);
                break;
            }
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_lines_in_order() {
        let input: &[u8] = b"first\r\nsecond\nthird";
        let mut seen = Vec::new();
        let count = read_lines(input, |line| seen.push(line.to_string())).await;
        assert_eq!(count, 3);
        assert_eq!(seen, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_reader() {
        let input: &[u8] = b"caf\xff\nafter\n";
        let mut seen = Vec::new();
        read_lines(input, |line| seen.push(line.to_string())).await;
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("caf"));
        assert_eq!(seen[1], "after");
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let input: &[u8] = b"";
        assert_eq!(read_lines(input, |_| panic!("no lines expected")).await, 0);
    }
}
