//! Just enough SMTP to hand a report to a relay on the local network.

use crate::notify::NotifyError;
use base64::Engine;
use base64::engine::general_purpose;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

pub struct MailMessage<'a> {
    pub from: &'a str,
    pub to: &'a [String],
    pub subject: &'a str,
    pub body: &'a str,
}

pub async fn send_mail(
    host: &str,
    port: u16,
    auth: Option<(&str, &str)>,
    message: MailMessage<'_>,
) -> Result<(), NotifyError> {
    let stream = TcpStream::connect((host, port)).await?;
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    expect_code(&mut reader, 220).await?;
    command(&mut write_half, &mut reader, "EHLO watchz", 250).await?;

    if let Some((user, password)) = auth {
        let identity = general_purpose::STANDARD.encode(format!("\0{user}\0{password}"));
        command(&mut write_half, &mut reader, &format!("AUTH PLAIN {identity}"), 235).await?;
    }

    command(
        &mut write_half,
        &mut reader,
        &format!("MAIL FROM:<{}>", message.from),
        250,
    )
    .await?;
    for recipient in message.to {
        command(
            &mut write_half,
            &mut reader,
            &format!("RCPT TO:<{recipient}>"),
            250,
        )
        .await?;
    }

    command(&mut write_half, &mut reader, "DATA", 354).await?;
    let mut payload = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n",
        message.from,
        message.to.join(", "),
        message.subject
    );
    for line in message.body.lines() {
        // A lone dot terminates DATA; dot-stuff per RFC 5321.
        if line.starts_with('.') {
            payload.push('.');
        }
        payload.push_str(line);
        payload.push_str("\r\n");
    }
    payload.push_str(".\r\n");
    write_half.write_all(payload.as_bytes()).await?;
    write_half.flush().await?;
    expect_code(&mut reader, 250).await?;

    write_half.write_all(b"QUIT\r\n").await?;
    write_half.flush().await?;
    Ok(())
}

async fn command(
    write_half: &mut WriteHalf<TcpStream>,
    reader: &mut BufReader<ReadHalf<TcpStream>>,
    line: &str,
    expected: u16,
) -> Result<(), NotifyError> {
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\r\n").await?;
    write_half.flush().await?;
    expect_code(reader, expected).await
}

/// Read one (possibly multiline) reply and require the given code.
async fn expect_code(
    reader: &mut BufReader<ReadHalf<TcpStream>>,
    expected: u16,
) -> Result<(), NotifyError> {
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(NotifyError::Smtp("connection closed mid-reply".into()));
        }
        let line = line.trim_end();
        if line.len() < 4 {
            return Err(NotifyError::Smtp(format!("short reply '{line}'")));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| NotifyError::Smtp(format!("unparseable reply '{line}'")))?;
        // "250-..." continues the reply; "250 ..." ends it.
        if line.as_bytes()[3] == b'-' {
            continue;
        }
        if code != expected {
            return Err(NotifyError::Smtp(format!(
                "expected {expected}, server said '{line}'"
            )));
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Scripted relay: answers every command with the right code and
    /// captures everything the client sends.
    async fn fake_relay() -> (u16, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"220 fake ESMTP\r\n").await.unwrap();
            let mut transcript = String::new();
            let mut buffer = [0u8; 1024];
            let mut in_data = false;
            let mut pending = String::new();
            loop {
                let n = match stream.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.push_str(&String::from_utf8_lossy(&buffer[..n]));
                while let Some(end) = pending.find("\r\n") {
                    let line = pending[..end].to_string();
                    pending.drain(..end + 2);
                    transcript.push_str(&line);
                    transcript.push('\n');
                    if in_data {
                        if line == "." {
                            in_data = false;
                            stream.write_all(b"250 queued\r\n").await.unwrap();
                        }
                        continue;
                    }
                    let reply: &[u8] = if line.starts_with("EHLO") {
                        b"250-fake\r\n250 AUTH PLAIN\r\n"
                    } else if line.starts_with("AUTH") {
                        b"235 ok\r\n"
                    } else if line.starts_with("MAIL") || line.starts_with("RCPT") {
                        b"250 ok\r\n"
                    } else if line == "DATA" {
                        in_data = true;
                        b"354 go ahead\r\n"
                    } else if line == "QUIT" {
                        stream.write_all(b"221 bye\r\n").await.unwrap();
                        let _ = done_tx.send(transcript);
                        return;
                    } else {
                        b"500 what\r\n"
                    };
                    stream.write_all(reply).await.unwrap();
                }
            }
            let _ = done_tx.send(transcript);
        });
        (port, done_rx)
    }

    #[tokio::test]
    async fn test_full_dialogue_with_auth() {
        let (port, done) = fake_relay().await;
        let to = vec!["ops@example.com".to_string()];
        send_mail(
            "127.0.0.1",
            port,
            Some(("alice", "pw")),
            MailMessage {
                from: "watchz@example.com",
                to: &to,
                subject: "scan report",
                body: "all good\n.leading dot line",
            },
        )
        .await
        .unwrap();

        let transcript = done.await.unwrap();
        assert!(transcript.contains("EHLO watchz"));
        assert!(transcript.contains("AUTH PLAIN"));
        assert!(transcript.contains("MAIL FROM:<watchz@example.com>"));
        assert!(transcript.contains("RCPT TO:<ops@example.com>"));
        assert!(transcript.contains("Subject: scan report"));
        // Dot-stuffed body line survived.
        assert!(transcript.contains("..leading dot line"));
    }
}
