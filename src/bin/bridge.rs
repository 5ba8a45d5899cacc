use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpListener,
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
};
use tracing::{info, warn};
use url::Url;

use acbusemu::{
    config::{port_url, Port},
    logging,
};

/// A virtual bus for the emulators
///
/// Every byte written by a client is delivered to all clients, the writer
/// included, the same way the real half-duplex wire hands a transmitter its own
/// bytes back. Serial ports attached with --attach already hear their own
/// transmissions on the physical bus and are not echoed to.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address and port to listen on (host:port) for bus clients
    listen: String,

    /// Additional ports to attach to the bus.
    ///
    /// a serial device path, or serial:///device/path or tcp+raw://host:port URLs
    #[arg(long, value_parser = port_url)]
    attach: Vec<Url>,
}

/// Chunks queued for a client that is not keeping up are dropped.
const CLIENT_QUEUE_LEN: usize = 64;

struct Client {
    queue: mpsc::Sender<Vec<u8>>,
    echo: bool,
}

#[derive(Default)]
struct SharedState {
    next_port_id: usize,
    clients: HashMap<usize, Client>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to listen on {}", args.listen))?;

    let state = Arc::new(Mutex::new(SharedState::default()));

    for url in args.attach {
        let id = match Port::open(&url).await? {
            Port::Serial(port) => attach_port(port, false, state.clone()).await,
            Port::TcpRaw(stream) => attach_port(stream, true, state.clone()).await,
        };

        info!("{url} attached as client {id}");
    }

    info!("listening on {}", args.listen);

    loop {
        let (socket, addr) = listener.accept().await?;

        socket.set_nodelay(true)?;

        let id = attach_port(socket, true, state.clone()).await;

        info!("new connection from {addr} attached as client {id}");
    }
}

async fn attach_port<T>(socket: T, echo: bool, state: Arc<Mutex<SharedState>>) -> usize
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (rx, tx) = split(socket);
    let (queue, pending) = mpsc::channel(CLIENT_QUEUE_LEN);

    let id = {
        let mut state = state.lock().await;

        let id = state.next_port_id;
        state.next_port_id += 1;

        state.clients.insert(id, Client { queue, echo });

        id
    };

    tokio::spawn(async move { deliver(id, tx, pending).await });
    tokio::spawn(async move { process(id, rx, state).await });

    id
}

async fn deliver<T>(id: usize, mut socket: WriteHalf<T>, mut pending: mpsc::Receiver<Vec<u8>>)
where
    T: AsyncWrite,
{
    while let Some(chunk) = pending.recv().await {
        if let Err(err) = socket.write_all(&chunk).await {
            warn!("error while writing to client {id}: {err}");
        }
    }
}

async fn process<T>(id: usize, mut socket: ReadHalf<T>, state: Arc<Mutex<SharedState>>)
where
    T: AsyncRead,
{
    let mut buffer = vec![0; 256];

    loop {
        let n = match socket.read(&mut buffer).await {
            Ok(n) => n,
            Err(err) => {
                warn!("error while reading from client {id}: {err}");
                break;
            }
        };

        if n == 0 {
            break;
        }

        let targets: Vec<_> = state
            .lock()
            .await
            .clients
            .iter()
            .filter(|(other_id, client)| **other_id != id || client.echo)
            .map(|(other_id, client)| (*other_id, client.queue.clone()))
            .collect();

        for (other_id, queue) in targets {
            match queue.try_send(buffer[0..n].to_vec()) {
                Ok(()) => (),
                Err(TrySendError::Full(chunk)) => {
                    warn!("client {other_id} is not keeping up, dropped {} bytes", chunk.len())
                }
                // client is going away
                Err(TrySendError::Closed(_)) => (),
            }
        }
    }

    // socket was closed, no longer broadcast to it
    info!("client {id} disconnected");
    state.lock().await.clients.remove(&id);
}
