use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{ProbeError, ERROR_PREFIX};
use crate::config::ProbeTimeouts;

/// 연결 타임아웃 등급
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTier {
    /// 대부분 실패가 예상되는 대량 스캔
    Fast,
    /// 응답이 예상되는 확인된 인스턴스
    Standard,
    /// 다른 호스트
    Remote,
}

/// 인스턴스 하나에 한 줄 요청을 보내고 한 줄 응답을 받는 통로
///
/// 테스트에서는 스크립트된 구현으로 교체합니다.
#[async_trait]
pub trait ControlLink: Send + Sync {
    async fn request(
        &self,
        address: &str,
        port: u16,
        line: &str,
        tier: ProbeTier,
    ) -> Result<String, ProbeError>;
}

/// 실제 TCP 소켓 구현
#[derive(Debug, Clone)]
pub struct TcpLink {
    timeouts: ProbeTimeouts,
}

impl TcpLink {
    pub fn new(timeouts: ProbeTimeouts) -> Self {
        Self { timeouts }
    }

    fn connect_timeout(&self, tier: ProbeTier) -> Duration {
        Duration::from_millis(match tier {
            ProbeTier::Fast => self.timeouts.fast_ms,
            ProbeTier::Standard => self.timeouts.standard_ms,
            ProbeTier::Remote => self.timeouts.remote_connect_ms,
        })
    }
}

#[async_trait]
impl ControlLink for TcpLink {
    async fn request(
        &self,
        address: &str,
        port: u16,
        line: &str,
        tier: ProbeTier,
    ) -> Result<String, ProbeError> {
        let target = format!("{}:{}", address, port);
        if address.trim().is_empty() {
            return Err(ProbeError::InvalidAddress(target));
        }

        let stream = match tokio::time::timeout(self.connect_timeout(tier), TcpStream::connect(&target)).await {
            Err(_) => return Err(ProbeError::Timeout(target)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(ProbeError::Refused(target));
            }
            Ok(Err(e)) => {
                return Err(ProbeError::Io { addr: target, message: e.to_string() });
            }
            Ok(Ok(stream)) => stream,
        };

        let read_timeout = Duration::from_millis(self.timeouts.read_ms);
        let exchange = async {
            let (reader, mut writer) = stream.into_split();
            writer.write_all(format!("{}\n", line).as_bytes()).await?;
            writer.flush().await?;

            let mut reader = BufReader::new(reader);
            let mut buf = String::new();
            reader.read_line(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };

        let response = match tokio::time::timeout(read_timeout, exchange).await {
            Err(_) => return Err(ProbeError::Timeout(target)),
            Ok(Err(e)) => return Err(ProbeError::Io { addr: target, message: e.to_string() }),
            Ok(Ok(buf)) => buf,
        };

        let response = response.trim();
        if response.is_empty() {
            return Err(ProbeError::EmptyResponse(target));
        }
        if let Some(rest) = response.strip_prefix(ERROR_PREFIX) {
            return Err(ProbeError::Rejected(rest.trim().to_string()));
        }
        Ok(response.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn link() -> TcpLink {
        TcpLink::new(ProbeTimeouts { fast_ms: 200, standard_ms: 500, remote_connect_ms: 500, read_ms: 300 })
    }

    async fn one_shot_server(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            let mut reader = BufReader::new(r);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            w.write_all(reply.as_bytes()).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn returns_trimmed_response_line() {
        let port = one_shot_server("1.4.2\r\n").await;
        let resp = link().request("127.0.0.1", port, "VERSION", ProbeTier::Standard).await;
        assert_eq!(resp, Ok("1.4.2".to_string()));
    }

    #[tokio::test]
    async fn error_prefix_becomes_rejected() {
        let port = one_shot_server("ERROR: Unknown command: NOPE\n").await;
        let resp = link().request("127.0.0.1", port, "NOPE", ProbeTier::Standard).await;
        assert_eq!(resp, Err(ProbeError::Rejected("Unknown command: NOPE".into())));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = link().request("127.0.0.1", port, "INFO", ProbeTier::Fast).await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn silent_peer_hits_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let err = link().request("127.0.0.1", port, "INFO", ProbeTier::Standard).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }
}
