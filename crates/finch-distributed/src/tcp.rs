use crate::{SyncError, SyncResult, Synchronizer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Newline-delimited JSON messages on the group's sockets.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
enum WireMessage {
    Join { rank: usize },
    Ready,
    Arrive { rank: usize, generation: u64 },
    Release { generation: u64 },
}

#[derive(Debug)]
struct Link {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Link {
    fn new(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self { reader: BufReader::new(read), writer }
    }

    async fn send(&mut self, msg: &WireMessage) -> SyncResult<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> SyncResult<WireMessage> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(SyncError::Protocol("peer closed connection".to_string()));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[derive(Debug)]
struct Peer {
    rank: usize,
    link: Link,
}

#[derive(Debug)]
enum Role {
    /// Rank 0 holds one link per other rank and drives each barrier.
    Chief { peers: tokio::sync::Mutex<Vec<Peer>> },
    /// Other ranks hold one link to rank 0.
    Member { link: tokio::sync::Mutex<Link> },
    /// A world of one synchronizes trivially.
    Solo,
}

/// Process-group handle over localhost TCP. Rank 0 listens on the
/// configured port and the rest connect to it; once the full group has
/// joined, barriers are generation-counted arrive/release exchanges
/// through rank 0.
#[derive(Debug)]
pub struct TcpSynchronizer {
    rank: usize,
    world_size: usize,
    generation: AtomicU64,
    role: Role,
}

impl TcpSynchronizer {
    /// Block until all `world_size` workers have joined, or fail with
    /// `RendezvousTimeout` once `timeout` elapses. This is the only
    /// bounded wait in the synchronizer.
    pub async fn rendezvous(
        rank: usize,
        world_size: usize,
        port: u16,
        timeout: Duration,
    ) -> SyncResult<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(SyncError::Protocol(format!(
                "rank {rank} out of range for world size {world_size}"
            )));
        }
        let role = if world_size == 1 {
            Role::Solo
        } else if rank == 0 {
            Role::Chief { peers: tokio::sync::Mutex::new(Self::accept_peers(world_size, port, timeout).await?) }
        } else {
            Role::Member { link: tokio::sync::Mutex::new(Self::join_group(rank, world_size, port, timeout).await?) }
        };
        info!(rank, world_size, "process group ready");
        Ok(Self { rank, world_size, generation: AtomicU64::new(0), role })
    }

    async fn accept_peers(world_size: usize, port: u16, timeout: Duration) -> SyncResult<Vec<Peer>> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let joined = AtomicUsize::new(1); // rank 0 counts itself
        let accept_all = async {
            let mut peers: Vec<Peer> = Vec::with_capacity(world_size - 1);
            while peers.len() < world_size - 1 {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let mut link = Link::new(stream);
                match link.recv().await? {
                    WireMessage::Join { rank }
                        if rank > 0 && rank < world_size && !peers.iter().any(|p| p.rank == rank) =>
                    {
                        debug!(rank, %addr, "worker joined");
                        joined.fetch_add(1, Ordering::SeqCst);
                        peers.push(Peer { rank, link });
                    }
                    other => {
                        return Err(SyncError::Protocol(format!("unexpected join message: {other:?}")));
                    }
                }
            }
            Ok(peers)
        };
        let mut peers = tokio::time::timeout(timeout, accept_all)
            .await
            .map_err(|_| SyncError::RendezvousTimeout {
                waited_secs: timeout.as_secs(),
                joined: joined.load(Ordering::SeqCst),
                world_size,
            })??;
        for peer in &mut peers {
            peer.link.send(&WireMessage::Ready).await?;
        }
        Ok(peers)
    }

    async fn join_group(rank: usize, world_size: usize, port: u16, timeout: Duration) -> SyncResult<Link> {
        let join = async {
            // Rank 0 may not be listening yet; retry until the window closes.
            let stream = loop {
                match TcpStream::connect(("127.0.0.1", port)).await {
                    Ok(stream) => break stream,
                    Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                }
            };
            stream.set_nodelay(true)?;
            let mut link = Link::new(stream);
            link.send(&WireMessage::Join { rank }).await?;
            match link.recv().await? {
                WireMessage::Ready => Ok(link),
                other => Err(SyncError::Protocol(format!("expected ready, got {other:?}"))),
            }
        };
        tokio::time::timeout(timeout, join).await.map_err(|_| SyncError::RendezvousTimeout {
            waited_secs: timeout.as_secs(),
            joined: 0,
            world_size,
        })?
    }
}

#[async_trait]
impl Synchronizer for TcpSynchronizer {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn barrier(&self) -> SyncResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        match &self.role {
            Role::Solo => Ok(()),
            Role::Chief { peers } => {
                let mut peers = peers.lock().await;
                for peer in peers.iter_mut() {
                    match peer.link.recv().await? {
                        WireMessage::Arrive { rank, generation: g } if rank == peer.rank && g == generation => {}
                        other => {
                            return Err(SyncError::Protocol(format!(
                                "barrier {generation}: unexpected message from rank {}: {other:?}",
                                peer.rank
                            )));
                        }
                    }
                }
                for peer in peers.iter_mut() {
                    peer.link.send(&WireMessage::Release { generation }).await?;
                }
                Ok(())
            }
            Role::Member { link } => {
                let mut link = link.lock().await;
                link.send(&WireMessage::Arrive { rank: self.rank, generation }).await?;
                match link.recv().await? {
                    WireMessage::Release { generation: g } if g == generation => Ok(()),
                    other => Err(SyncError::Protocol(format!(
                        "barrier {generation}: expected release, got {other:?}"
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    async fn group(world_size: usize, port: u16) -> Vec<TcpSynchronizer> {
        let mut joins = Vec::new();
        for rank in 0..world_size {
            joins.push(tokio::spawn(TcpSynchronizer::rendezvous(
                rank,
                world_size,
                port,
                Duration::from_secs(5),
            )));
        }
        let mut handles = Vec::new();
        for join in joins {
            handles.push(join.await.unwrap().unwrap());
        }
        handles
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rendezvous_and_barriers() {
        let world_size = 3;
        let handles = group(world_size, 39_511).await;
        let arrived = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = handles
            .into_iter()
            .map(|sync| {
                let arrived = Arc::clone(&arrived);
                tokio::spawn(async move {
                    for round in 1..=4usize {
                        arrived.fetch_add(1, Ordering::SeqCst);
                        sync.barrier().await.unwrap();
                        assert!(arrived.load(Ordering::SeqCst) >= round * 3);
                        sync.barrier().await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_chief_times_out_without_peers() {
        let err = TcpSynchronizer::rendezvous(0, 2, 39_512, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RendezvousTimeout { world_size: 2, .. }));
    }

    #[tokio::test]
    async fn test_member_times_out_without_chief() {
        let err = TcpSynchronizer::rendezvous(1, 2, 39_513, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RendezvousTimeout { .. }));
    }

    #[tokio::test]
    async fn test_solo_world_needs_no_network() {
        let sync = TcpSynchronizer::rendezvous(0, 1, 1, Duration::from_millis(10)).await.unwrap();
        sync.barrier().await.unwrap();
        sync.barrier().await.unwrap();
    }
}
