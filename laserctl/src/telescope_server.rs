/*!
Planetarium telescope server.

Listens for the planetarium's telescope connection, turns each received frame into a
[`TelescopeEvent::CoordinatesReceived`] and writes position reports back so the
planetarium draws its field-of-view indicator where the mount points.

The socket side runs on a tokio runtime owned by [`TelescopeService`]; the rest of the
application stays on plain threads and reaches the socket through
[`TelescopeService::request_field_of_view_update`].

Only the most recently accepted connection receives position reports. An older
connection keeps feeding coordinates until it closes.
*/

use crate::config::TelescopeConfig;
use crate::events::{ChannelId, Event, TelescopeEvent};
use crossbeam_channel::Sender;
use shared::protocol::FRAME_SIZE_BYTES;
use shared::ProtocolFrame;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Receive buffer size; only the first frame of each read is decoded
const RECV_BUFFER_BYTES: usize = 8 * FRAME_SIZE_BYTES;

/// Connection that receives position reports
struct ChannelSlot {
    id: ChannelId,
    writer: OwnedWriteHalf,
}

type CurrentChannel = Arc<Mutex<Option<ChannelSlot>>>;

/// TCP server speaking the planetarium telescope protocol
pub struct TelescopeService {
    runtime: Runtime,
    local_addr: SocketAddr,
    current: CurrentChannel,
    refresh_repeat: usize,
}

impl TelescopeService {
    /// Bind the listening socket and start accepting connections
    pub fn start(config: &TelescopeConfig, events: Sender<Event>) -> io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;
        socket.set_nonblocking(true)?;

        let std_listener: std::net::TcpListener = socket.into();
        let local_addr = std_listener.local_addr()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("telescope")
            .enable_all()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)?
        };
        info!("🔭 Telescope server listening on {}", local_addr);

        let current: CurrentChannel = Arc::new(Mutex::new(None));
        runtime.spawn(accept_loop(listener, Arc::clone(&current), events));

        Ok(Self {
            runtime,
            local_addr,
            current,
            refresh_repeat: config.refresh_repeat,
        })
    }

    /// Address the server actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send the current mount pointing to the planetarium, repeated so its indicator
    /// refreshes. Returns false when no planetarium is connected.
    pub fn request_field_of_view_update(&self, ra: f64, dec: f64) -> io::Result<bool> {
        let frame = ProtocolFrame::current_position(ra, dec).encode();
        let current = Arc::clone(&self.current);
        let repeat = self.refresh_repeat;

        self.runtime.block_on(async move {
            let mut slot = current.lock().await;
            let Some(channel) = slot.as_mut() else {
                return Ok(false);
            };

            for _ in 0..repeat {
                if let Err(e) = channel.writer.write_all(&frame).await {
                    warn!("Position report to channel {} failed: {}", channel.id, e);
                    *slot = None;
                    return Err(e);
                }
            }
            trace!("Sent {} x {}", repeat, hex::encode(&frame));
            Ok(true)
        })
    }

    /// Stop accepting and drop every connection
    pub fn close(self) {
        self.runtime.shutdown_timeout(Duration::from_secs(1));
        info!("Telescope server closed");
    }
}

async fn accept_loop(listener: TcpListener, current: CurrentChannel, events: Sender<Event>) {
    let mut next_id: ChannelId = 0;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                next_id += 1;
                let id = next_id;
                let (reader, writer) = stream.into_split();

                // Replacing the slot drops the previous writer
                *current.lock().await = Some(ChannelSlot { id, writer });
                info!("📡 Planetarium connected from {} (channel {})", peer, id);

                emit(
                    &events,
                    TelescopeEvent::ClientConnected {
                        channel: id,
                        peer: peer.to_string(),
                    },
                );
                tokio::spawn(channel_loop(id, reader, Arc::clone(&current), events.clone()));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn channel_loop(
    id: ChannelId,
    mut reader: OwnedReadHalf,
    current: CurrentChannel,
    events: Sender<Event>,
) {
    let mut buffer = [0u8; RECV_BUFFER_BYTES];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                trace!("Channel {} received {}", id, hex::encode(&buffer[..n]));
                match ProtocolFrame::decode(&buffer[..n]) {
                    Ok(frame) => {
                        let (ra_raw, dec_raw, time_raw) = frame.raw_values();
                        emit(
                            &events,
                            TelescopeEvent::CoordinatesReceived {
                                channel: id,
                                ra_raw,
                                dec_raw,
                                time_raw,
                            },
                        );
                    }
                    Err(e) => debug!("Channel {}: {}", id, e),
                }
            }
            Err(e) => {
                warn!("Channel {} read error: {}", id, e);
                break;
            }
        }
    }

    {
        let mut slot = current.lock().await;
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
        }
    }
    info!("Planetarium channel {} closed", id);
    emit(&events, TelescopeEvent::ClientDisconnected { channel: id });
}

fn emit(events: &Sender<Event>, event: TelescopeEvent) {
    if events.send(Event::Telescope(event)).is_err() {
        debug!("Event receiver gone, dropping telescope event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn loopback() -> TelescopeConfig {
        TelescopeConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            ..TelescopeConfig::default()
        }
    }

    fn next_event(rx: &Receiver<Event>) -> TelescopeEvent {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Telescope(event) => event,
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn goto_frame(ra: u32, dec: i32, time: i64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&20u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&time.to_le_bytes());
        data.extend_from_slice(&ra.to_le_bytes());
        data.extend_from_slice(&dec.to_le_bytes());
        data
    }

    #[test]
    fn test_inbound_frame_becomes_event() {
        let (tx, rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();

        let mut client = TcpStream::connect(service.local_addr()).unwrap();
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientConnected { channel: 1, .. }));

        client.write_all(&goto_frame(0x8000_0000, -1000, 42)).unwrap();
        assert_eq!(
            next_event(&rx),
            TelescopeEvent::CoordinatesReceived {
                channel: 1,
                ra_raw: 2147483648.0,
                dec_raw: -1000.0,
                time_raw: 42.0,
            }
        );

        drop(client);
        assert_eq!(next_event(&rx), TelescopeEvent::ClientDisconnected { channel: 1 });
        service.close();
    }

    #[test]
    fn test_short_frame_is_ignored() {
        let (tx, rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();

        let mut client = TcpStream::connect(service.local_addr()).unwrap();
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientConnected { .. }));

        client.write_all(&[0x14, 0x00, 0x00]).unwrap();
        drop(client);

        assert!(matches!(next_event(&rx), TelescopeEvent::ClientDisconnected { .. }));
        service.close();
    }

    #[test]
    fn test_field_of_view_update_repeats_frame() {
        let (tx, rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();

        let mut client = TcpStream::connect(service.local_addr()).unwrap();
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientConnected { .. }));

        assert!(service
            .request_field_of_view_update(std::f64::consts::PI, 0.0)
            .unwrap());

        let mut received = vec![0u8; 240];
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.read_exact(&mut received).unwrap();

        let frames: Vec<&[u8]> = received.chunks(24).collect();
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(|f| *f == frames[0]));
        assert_eq!(&frames[0][0..2], &[0x18, 0x00]);

        let frame = ProtocolFrame::decode(frames[0]).unwrap();
        assert!(frame.ra.abs_diff(0x8000_0000) <= 1);
        assert_eq!(frame.dec, 0);
        service.close();
    }

    #[test]
    fn test_field_of_view_update_without_client() {
        let (tx, _rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();

        assert!(!service.request_field_of_view_update(1.0, 0.5).unwrap());
        service.close();
    }

    #[test]
    fn test_disconnect_clears_current_channel() {
        let (tx, rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();

        let client = TcpStream::connect(service.local_addr()).unwrap();
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientConnected { .. }));
        drop(client);
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientDisconnected { .. }));

        assert!(!service.request_field_of_view_update(1.0, 0.5).unwrap());
        service.close();
    }

    #[test]
    fn test_newest_connection_receives_reports() {
        let (tx, rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();

        let _first = TcpStream::connect(service.local_addr()).unwrap();
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientConnected { channel: 1, .. }));
        let mut second = TcpStream::connect(service.local_addr()).unwrap();
        assert!(matches!(next_event(&rx), TelescopeEvent::ClientConnected { channel: 2, .. }));

        assert!(service.request_field_of_view_update(0.0, 0.0).unwrap());
        let mut received = vec![0u8; 240];
        second
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        second.read_exact(&mut received).unwrap();
        service.close();
    }

    #[test]
    fn test_serves_after_event_receiver_dropped() {
        let (tx, rx) = unbounded();
        let service = TelescopeService::start(&loopback(), tx).unwrap();
        drop(rx);

        let mut client = TcpStream::connect(service.local_addr()).unwrap();
        client.write_all(&goto_frame(1, 2, 3)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !service.request_field_of_view_update(0.0, 0.0).unwrap() {
            assert!(std::time::Instant::now() < deadline, "connection never accepted");
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut received = vec![0u8; 240];
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.read_exact(&mut received).unwrap();
        service.close();
    }
}
