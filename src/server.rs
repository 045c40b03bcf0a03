use std::{io, net::SocketAddr};

use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::{
    connection::Connection,
    model::Uptime,
    packet::{ClientPacket, ServerPacket},
    queue::JobQueue,
};

/// Owns the job queue. Every request is handled to completion by a single command
/// loop, so queue mutations never interleave.
pub struct Server {
    cancellation_token: CancellationToken,
    command_tx: mpsc::Sender<Command>,
    queue: JobQueue,
    uptime: Uptime,
}

#[derive(Clone)]
pub struct ServerHandle {
    cancellation_token: CancellationToken,
    command_tx: mpsc::Sender<Command>,
    local_address: SocketAddr,
}

enum Command {
    NewConnection {
        tcp_stream: TcpStream,
        remote_address: SocketAddr,
    },
    Request {
        connection_id: Uuid,
        packet: ClientPacket,
        response_tx: oneshot::Sender<ServerPacket>,
    },
}

impl Server {
    pub async fn run(
        address: impl ToSocketAddrs,
        uptime: Uptime,
        cancellation_token: CancellationToken,
    ) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(address).await?;
        let local_address = listener.local_addr()?;

        let (command_tx, command_rx) = mpsc::channel(10000);
        let server = Server {
            cancellation_token,
            command_tx,
            queue: JobQueue::new(),
            uptime,
        };
        let handle = server.handle(local_address);

        tokio::spawn(accept_loop(listener, handle.clone()));
        tokio::spawn(command_loop(command_rx, server, handle.clone()));

        Ok(handle)
    }

    fn handle_command(&mut self, command: Command, handle: &ServerHandle) {
        match command {
            Command::NewConnection {
                tcp_stream,
                remote_address,
            } => {
                let connection_id = Uuid::new_v4();
                debug!("{} joined from {}", connection_id, remote_address);
                Connection::start(connection_id, tcp_stream, handle.clone());
            }
            Command::Request {
                connection_id,
                packet,
                response_tx,
            } => {
                debug!("{} request {:?}", connection_id, packet);
                let response = self.handle_request(packet);
                let _ = response_tx.send(response);
            }
        }
    }

    fn handle_request(&mut self, packet: ClientPacket) -> ServerPacket {
        match packet {
            ClientPacket::AddJob { task, priority } => {
                ServerPacket::AddJobResponse(self.queue.enqueue(task, priority))
            }
            ClientPacket::GetJob => {
                let next = self.queue.take_next();
                debug!("Jobs remaining in queue: {}", self.queue.len());
                ServerPacket::GetJobResponse(next)
            }
            ClientPacket::ClearJobQueue => {
                self.queue.clear();
                ServerPacket::ClearResponse
            }
            ClientPacket::Health => ServerPacket::HealthResponse {
                uptime: self.uptime.seconds(),
            },
        }
    }

    fn handle(&self, local_address: SocketAddr) -> ServerHandle {
        ServerHandle {
            cancellation_token: self.cancellation_token.clone(),
            command_tx: self.command_tx.clone(),
            local_address,
        }
    }
}

async fn accept_loop(listener: TcpListener, server_handle: ServerHandle) {
    loop {
        let session = tokio::select! {
            v = listener.accept() => v,
            _ = server_handle.wait_shutdown() => return,
        };
        let (tcp_stream, remote_address) = match session {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        server_handle
            .new_connection(tcp_stream, remote_address)
            .await;
    }
}

async fn command_loop(
    mut command_rx: mpsc::Receiver<Command>,
    mut server: Server,
    server_handle: ServerHandle,
) {
    loop {
        let command = tokio::select! {
            v = command_rx.recv() => v,
            _ = server_handle.wait_shutdown() => return,
        };
        let Some(command) = command else {
            return;
        };

        server.handle_command(command, &server_handle);
    }
}

impl ServerHandle {
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    pub fn wait_shutdown(&self) -> WaitForCancellationFuture {
        self.cancellation_token.cancelled()
    }

    async fn new_connection(&self, tcp_stream: TcpStream, remote_address: SocketAddr) {
        let _ = self
            .command_tx
            .send(Command::NewConnection {
                tcp_stream,
                remote_address,
            })
            .await;
    }

    pub async fn request(&self, connection_id: Uuid, packet: ClientPacket) -> Option<ServerPacket> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Request {
                connection_id,
                packet,
                response_tx,
            })
            .await
            .ok()?;
        response_rx.await.ok()
    }
}
