use std::collections::BTreeMap;
use std::process::Child;

use crate::prelude::*;
use crate::utils::session::SessionStore;

#[derive(Debug)]
pub struct Listener {
    pub socket: TcpListener,
    pub vhosts: Vec<Arc<ServerConfig>>,
}

/// The reactor. One poll, one thread; listeners grouped by bind address
/// carry the virtual hosts that answer on that socket, and each accepted
/// connection runs its own orchestrator off the readiness events.
pub struct Server {
    listeners: HashMap<Token, Listener>,
    connections: HashMap<Token, HttpConnection>,
    sessions: SessionStore,
    zombie_purgatory: Vec<Child>,
    next_token: usize,
    server_token: Arc<String>,
}

impl Server {
    pub fn new(config: AppConfig, poll: &Poll) -> Result<Server> {
        let server_token = Arc::new(format!("{}/{}", config.name, config.version));

        // One listening socket per distinct (host, port); every server
        // declared on it becomes a virtual host of that socket.
        let mut groups: BTreeMap<(String, u16), Vec<Arc<ServerConfig>>> = BTreeMap::new();
        for server in config.servers {
            let server = Arc::new(server);
            for port in &server.ports {
                groups
                    .entry((server.host.clone(), *port))
                    .or_default()
                    .push(Arc::clone(&server));
            }
        }

        let mut listeners = HashMap::new();
        let mut next_token = 0usize;
        for ((host, port), vhosts) in groups {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            let mut socket = TcpListener::bind(addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut socket, token, Interest::READABLE)?;
            let names: Vec<&str> = vhosts.iter().map(|v| v.server_name.as_str()).collect();
            info!("listening on {} ({})", addr, names.join(", "));
            listeners.insert(token, Listener { socket, vhosts });
        }

        Ok(Server {
            listeners,
            connections: HashMap::new(),
            sessions: SessionStore::new(),
            zombie_purgatory: Vec::new(),
            next_token,
            server_token,
        })
    }

    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            // Bounded wait so the sweeps run even on an idle server.
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            self.sweep_timeouts(&poll);
            self.sweep_cgi(&poll);
            self.sweep_zombies();

            for event in events.iter() {
                let token = event.token();
                if self.listeners.contains_key(&token) {
                    self.accept_ready(&poll, token);
                } else {
                    self.dispatch(&poll, token, event);
                }
            }
        }
    }

    fn accept_ready(&mut self, poll: &Poll, token: Token) {
        loop {
            let accepted = match self.listeners.get_mut(&token) {
                Some(listener) => listener.socket.accept(),
                None => return,
            };
            match accepted {
                Ok((mut stream, addr)) => {
                    let vhosts = match self.listeners.get(&token) {
                        Some(listener) => listener.vhosts.clone(),
                        None => return,
                    };
                    let conn_token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) =
                        poll.registry()
                            .register(&mut stream, conn_token, Interest::READABLE)
                    {
                        error!("cannot register connection from {}: {}", addr, e);
                        continue;
                    }
                    debug!("accepted {} as {:?}", addr, conn_token);
                    let conn =
                        HttpConnection::new(stream, vhosts, Arc::clone(&self.server_token));
                    self.connections.insert(conn_token, conn);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A failed accept never takes down the loop.
                    error!("accept error: {}", e);
                    return;
                }
            }
        }
    }

    fn dispatch(&mut self, poll: &Poll, token: Token, event: &Event) {
        let close = match self.connections.get_mut(&token) {
            None => return,
            Some(conn) => {
                let mut close = false;
                if event.is_readable() || event.is_read_closed() {
                    close = conn
                        .on_readable(poll, token, &mut self.sessions)
                        .unwrap_or(true);
                }
                if !close && event.is_writable() {
                    close = conn
                        .on_writable(poll, token, &mut self.sessions)
                        .unwrap_or(true);
                }
                close || event.is_error()
            }
        };
        if close {
            self.close_connection(poll, token);
        }
    }

    fn sweep_timeouts(&mut self, poll: &Poll) {
        let expired: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.idle_for() >= CLIENT_TIMEOUT)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            info!("closing idle connection {:?}", token);
            self.close_connection(poll, token);
        }
    }

    fn sweep_cgi(&mut self, poll: &Poll) {
        let pending: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.pending_cgi.is_some())
            .map(|(token, _)| *token)
            .collect();
        for token in pending {
            let close = match self.connections.get_mut(&token) {
                Some(conn) => conn
                    .sweep_cgi(poll, token, &mut self.zombie_purgatory)
                    .unwrap_or(true),
                None => continue,
            };
            if close {
                self.close_connection(poll, token);
            }
        }
    }

    /// Killed children that could not be reaped immediately are retried
    /// until waitpid succeeds.
    fn sweep_zombies(&mut self) {
        self.zombie_purgatory
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }

    fn close_connection(&mut self, poll: &Poll, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            conn.reap_pending(&mut self.zombie_purgatory);
            if conn.registered {
                let _ = poll.registry().deregister(&mut conn.stream);
            }
            let _ = conn.stream.shutdown(std::net::Shutdown::Both);
            debug!("closed {:?}", token);
            // Dropping the connection releases its parser temp files and any
            // half-streamed file handle.
        }
    }
}
