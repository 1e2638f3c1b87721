//! Test helpers: a minimal in-process MQTT 3.1.1 broker and feed fixtures

#![allow(dead_code)]

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PUBREL: u8 = 6;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

/// Trimmed copy of the TAWES "aktuelle Messwerte" layout
pub const TAWES_FEED: &str = "\
Station;Name;Höhe m;Datum;Zeit;T °C;TP °C;RF %;WR °;WG km/h;WSR °;WSG km/h;N l/m²;LDred hPa;LDstat hPa;SO %
11035;Wien/Hohe Warte;198;19-10-2026;14:00;12,1;6,3;68;290;14,8;300;31,7;0;1018,2;994,1;41
11331;Klagenfurt/Flughafen;447;19-10-2026;14:00;15,4;7,9;61;130;5,4;150;16,2;0,2;1017,6;962,3;100
11240;Graz/Flughafen;340;19-10-2026;14:00;14,0;8,1;67;160;7,2;;;0;1017,9;975,4;
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    /// CONNACK accepted, complete QoS 1/2 handshakes
    Accept,
    /// CONNACK with the given non-zero return code
    Refuse(u8),
    /// Read CONNECT and never answer
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub struct FakeBroker {
    pub port: u16,
    handle: JoinHandle<Vec<ReceivedPublish>>,
}

impl FakeBroker {
    pub async fn start(mode: BrokerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake broker");
        let port = listener.local_addr().expect("local addr").port();

        let handle = tokio::spawn(async move {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return Vec::new(),
            };
            serve(stream, mode).await
        });

        Self { port, handle }
    }

    /// Wait for the client to disconnect and return everything it published
    pub async fn received(self) -> Vec<ReceivedPublish> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("fake broker did not finish")
            .expect("fake broker task panicked")
    }
}

/// Free port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}

async fn serve(mut stream: TcpStream, mode: BrokerMode) -> Vec<ReceivedPublish> {
    let mut received = Vec::new();

    match read_packet(&mut stream).await {
        Some((header, _)) if header >> 4 == CONNECT => {}
        _ => return received,
    }

    match mode {
        BrokerMode::Accept => {
            if stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.is_err() {
                return received;
            }
        }
        BrokerMode::Refuse(code) => {
            let _ = stream.write_all(&[0x20, 0x02, 0x00, code]).await;
            return received;
        }
        BrokerMode::Silent => {
            tokio::time::sleep(Duration::from_secs(10)).await;
            return received;
        }
    }

    while let Some((header, body)) = read_packet(&mut stream).await {
        let reply = match header >> 4 {
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let retain = header & 0x01 == 1;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).to_string();
                let mut offset = 2 + topic_len;
                let mut pkid = [0u8; 2];
                if qos > 0 {
                    pkid = [body[offset], body[offset + 1]];
                    offset += 2;
                }
                received.push(ReceivedPublish {
                    topic,
                    payload: String::from_utf8_lossy(&body[offset..]).to_string(),
                    qos,
                    retain,
                });
                match qos {
                    1 => Some(vec![0x40, 0x02, pkid[0], pkid[1]]),
                    2 => Some(vec![0x50, 0x02, pkid[0], pkid[1]]),
                    _ => None,
                }
            }
            PUBREL => Some(vec![0x70, 0x02, body[0], body[1]]),
            PINGREQ => Some(vec![0xD0, 0x00]),
            DISCONNECT => break,
            _ => None,
        };

        if let Some(bytes) = reply {
            if stream.write_all(&bytes).await.is_err() {
                break;
            }
        }
    }

    received
}

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;

    let mut remaining = 0usize;
    let mut multiplier = 1usize;
    loop {
        let byte = stream.read_u8().await.ok()?;
        remaining += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }

    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}
