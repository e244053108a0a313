//! # Connection Pool
//!
//! A pool of [`Connection`]s with fair-queued leases.
//!
//! All pool state - the idle set, the waiter FIFO, population counters -
//! lives on one actor task; handles and lease guards talk to it through a
//! channel. Waiters resolve strictly in arrival order, never after their
//! deadline.
//!
//! The pool keeps its population at or above `min` while open: whenever a
//! connection dies and the floor (or a waiter) calls for it, a replacement
//! build is started, delayed by an exponential backoff that resets on the
//! first success. With no waiters and the floor met, the pool is quiescent -
//! no speculative connecting.

use crate::config::{PoolBehavior, PoolConfig};
use crate::conn::Connection;
use crate::errors::{ConnectionError, PoolError};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A leased connection that returns itself to the pool on drop
///
/// Dereferences to [`Connection`]. Closing the connection before dropping
/// the guard is fine: the pool retires closed connections on return and
/// builds a replacement if its floor calls for one.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    commands: mpsc::UnboundedSender<PoolCommand>,
}

impl PooledConnection {
    fn new(conn: Connection, commands: mpsc::UnboundedSender<PoolCommand>) -> Self {
        Self {
            conn: Some(conn),
            commands,
        }
    }

    /// Takes the connection out without returning it to the pool
    fn detach(mut self) -> Option<Connection> {
        self.conn.take()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Invariant: `conn` is only `None` after detach/drop, and neither
        // leaves a guard behind.
        self.conn.as_ref().expect("connection already detached")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already detached")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // If the pool task is gone the connection just drops, which
            // shuts its driver down cleanly.
            let _ = self.commands.send(PoolCommand::Return { conn });
        }
    }
}

/// Handle to a running pool
///
/// Dropping the handle closes the pool.
#[derive(Debug)]
pub struct ConnectionPool {
    commands: mpsc::UnboundedSender<PoolCommand>,
    default_lease_deadline: Duration,
}

#[derive(Debug)]
enum PoolCommand {
    Lease {
        reply: oneshot::Sender<Result<PooledConnection, PoolError>>,
        deadline: Instant,
    },
    Return {
        conn: Connection,
    },
    /// A parked connection died; retire it and rebuild if the floor or a
    /// waiter calls for it
    Prune,
    Close {
        done: oneshot::Sender<()>,
    },
}

impl ConnectionPool {
    /// Validates the config, spawns the pool task and starts populating up
    /// to `min` connections.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let default_lease_deadline = config.default_lease_deadline;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (build_tx, build_rx) = mpsc::unbounded_channel();

        let task = PoolTask {
            config,
            commands: command_rx,
            command_tx: command_tx.clone(),
            builds: build_rx,
            build_tx,
            idle: VecDeque::new(),
            waiters: VecDeque::new(),
            leased: 0,
            building: 0,
            consecutive_failures: 0,
            next_address: 0,
            closed: false,
        };
        tokio::spawn(task.run());

        Ok(Self {
            commands: command_tx,
            default_lease_deadline,
        })
    }

    /// Leases a connection, waiting at most the pool's default deadline
    pub async fn lease(&self) -> Result<PooledConnection, PoolError> {
        self.lease_with_deadline(self.default_lease_deadline).await
    }

    /// Leases a connection, waiting at most `deadline`.
    ///
    /// Resolves immediately when an idle connection is available; otherwise
    /// the request joins the waiter FIFO (and, capacity permitting, a fresh
    /// connection build is started). Past the deadline the lease fails with
    /// [`PoolError::WaiterTimeout`] and any connection being built for it
    /// goes to the next waiter or the idle set instead.
    pub async fn lease_with_deadline(
        &self,
        deadline: Duration,
    ) -> Result<PooledConnection, PoolError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(PoolCommand::Lease {
                reply,
                deadline: Instant::now() + deadline,
            })
            .map_err(|_| PoolError::PoolClosed)?;
        result.await.map_err(|_| PoolError::PoolClosed)?
    }

    /// Closes the pool: waiters fail with [`PoolError::PoolClosed`], idle
    /// connections close now, leased ones when returned.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(PoolCommand::Close { done }).is_ok() {
            let _ = finished.await;
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        let (done, _finished) = oneshot::channel();
        let _ = self.commands.send(PoolCommand::Close { done });
    }
}

/// The actor owning all pool state
struct PoolTask {
    config: PoolConfig,
    commands: mpsc::UnboundedReceiver<PoolCommand>,
    /// Kept for minting lease guards; the task therefore never observes the
    /// command channel closing and exits via its own population accounting.
    command_tx: mpsc::UnboundedSender<PoolCommand>,
    builds: mpsc::UnboundedReceiver<Result<Connection, ConnectionError>>,
    build_tx: mpsc::UnboundedSender<Result<Connection, ConnectionError>>,
    idle: VecDeque<IdleConnection>,
    waiters: VecDeque<Waiter>,
    /// Guards currently out
    leased: usize,
    /// Builds currently in flight
    building: usize,
    consecutive_failures: u32,
    /// Round-robin index over `config.addresses`
    next_address: usize,
    closed: bool,
}

#[derive(Debug)]
struct Waiter {
    reply: oneshot::Sender<Result<PooledConnection, PoolError>>,
    deadline: Instant,
}

/// A parked connection plus the death watcher spawned for this idle period.
/// The watcher is aborted whenever the connection leaves the idle set, so at
/// most one is ever alive per parked connection.
#[derive(Debug)]
struct IdleConnection {
    conn: Connection,
    watcher: AbortHandle,
}

impl IdleConnection {
    /// Aborts the watcher and surrenders the connection.
    fn unpark(self) -> Connection {
        self.watcher.abort();
        self.conn
    }
}

impl PoolTask {
    async fn run(mut self) {
        // Reach the floor before the first lease arrives.
        self.ensure_builds();

        loop {
            let next_deadline = self.waiters.iter().map(|w| w.deadline).min();
            let sleep_target =
                next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(result) = self.builds.recv() => self.handle_build(result),
                _ = tokio::time::sleep_until(sleep_target), if next_deadline.is_some() => {
                    self.expire_waiters();
                }
            }

            // Once closed, the task lingers only to retire still-leased
            // connections as their guards come back.
            if self.closed && self.leased == 0 && self.building == 0 {
                break;
            }
        }
        debug!("pool task finished");
    }

    fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Lease { reply, deadline } => self.handle_lease(reply, deadline),
            PoolCommand::Return { conn } => self.handle_return(conn),
            PoolCommand::Prune => self.prune_idle(),
            PoolCommand::Close { done } => {
                self.handle_close();
                let _ = done.send(());
            }
        }
    }

    fn handle_lease(
        &mut self,
        reply: oneshot::Sender<Result<PooledConnection, PoolError>>,
        deadline: Instant,
    ) {
        if self.closed {
            let _ = reply.send(Err(PoolError::PoolClosed));
            return;
        }

        // Serve from the idle set first; connections that died while parked
        // are retired on the way.
        while let Some(idle) = self.idle.pop_front() {
            let conn = idle.unpark();
            if conn.is_closed() {
                debug!("retiring idle connection that closed while parked");
                continue;
            }
            if let Some(conn) = self.lend(conn, reply) {
                // Caller vanished between asking and receiving.
                let idle = self.watched(conn);
                self.idle.push_front(idle);
            }
            self.ensure_builds();
            return;
        }

        if deadline <= Instant::now() {
            let _ = reply.send(Err(PoolError::WaiterTimeout));
            return;
        }

        trace!("queueing lease request ({} ahead)", self.waiters.len());
        self.waiters.push_back(Waiter { reply, deadline });
        self.ensure_builds();
    }

    fn handle_return(&mut self, conn: Connection) {
        self.leased -= 1;

        if conn.is_closed() {
            debug!("retiring returned connection (closed)");
            self.ensure_builds();
            return;
        }
        if self.closed {
            tokio::spawn(async move { conn.close().await });
            return;
        }
        // Elastic pools trim back down to the soft cap eagerly.
        if self.config.behavior == PoolBehavior::Elastic
            && self.leased + self.idle.len() + 1 > self.config.max
        {
            debug!("retiring returned connection (over soft cap)");
            tokio::spawn(async move { conn.close().await });
            self.ensure_builds();
            return;
        }

        self.offer(conn);
    }

    fn handle_close(&mut self) {
        if self.closed {
            return;
        }
        info!(
            "closing pool ({} idle, {} leased, {} waiting)",
            self.idle.len(),
            self.leased,
            self.waiters.len()
        );
        self.closed = true;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(Err(PoolError::PoolClosed));
        }
        for idle in self.idle.drain(..) {
            let conn = idle.unpark();
            tokio::spawn(async move { conn.close().await });
        }
    }

    fn handle_build(&mut self, result: Result<Connection, ConnectionError>) {
        self.building -= 1;
        match result {
            Ok(conn) => {
                self.consecutive_failures = 0;
                if self.closed {
                    tokio::spawn(async move { conn.close().await });
                    return;
                }
                self.offer(conn);
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    "connection build failed ({} consecutive): {e}",
                    self.consecutive_failures
                );
                // Retry only while someone actually needs the connection;
                // the next attempt carries the backoff delay.
                self.ensure_builds();
            }
        }
    }

    /// Hands a connection to the oldest live waiter, or parks it idle.
    fn offer(&mut self, mut conn: Connection) {
        let now = Instant::now();
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.deadline <= now {
                let _ = waiter.reply.send(Err(PoolError::WaiterTimeout));
                continue;
            }
            match self.lend(conn, waiter.reply) {
                None => return,
                // Waiter gave up; pass the connection on.
                Some(returned) => conn = returned,
            }
        }
        // Nobody is waiting anymore (e.g. an elastic build whose waiter
        // timed out). Park up to the cap, retire beyond it.
        if self.config.behavior == PoolBehavior::Elastic
            && self.leased + self.idle.len() + 1 > self.config.max
        {
            debug!("retiring surplus connection (over soft cap)");
            tokio::spawn(async move { conn.close().await });
            return;
        }
        self.park(conn);
    }

    /// Parks a connection as idle, with a watcher so the pool hears about it
    /// dying in place instead of discovering the corpse at lease time.
    fn park(&mut self, conn: Connection) {
        let idle = self.watched(conn);
        self.idle.push_back(idle);
    }

    /// Pairs a connection with a freshly spawned death watcher for one idle
    /// period.
    fn watched(&self, conn: Connection) -> IdleConnection {
        let mut close_watch = conn.close_watch();
        let command_tx = self.command_tx.clone();
        let watcher = tokio::spawn(async move {
            if close_watch.wait_for(|cause| cause.is_some()).await.is_ok() {
                let _ = command_tx.send(PoolCommand::Prune);
            }
        })
        .abort_handle();
        IdleConnection { conn, watcher }
    }

    /// Retires idle connections that closed while parked.
    fn prune_idle(&mut self) {
        let before = self.idle.len();
        let mut kept = VecDeque::with_capacity(before);
        for idle in self.idle.drain(..) {
            if idle.conn.is_closed() {
                // Its watcher has already fired (or is moot); stop it.
                idle.watcher.abort();
            } else {
                kept.push_back(idle);
            }
        }
        self.idle = kept;
        let retired = before - self.idle.len();
        if retired > 0 {
            debug!("pruned {retired} dead idle connection(s)");
            self.ensure_builds();
        }
    }

    /// Wraps `conn` in a guard and resolves `reply` with it. Gives the
    /// connection back when the requester is no longer listening.
    fn lend(
        &mut self,
        conn: Connection,
        reply: oneshot::Sender<Result<PooledConnection, PoolError>>,
    ) -> Option<Connection> {
        let guard = PooledConnection::new(conn, self.command_tx.clone());
        match reply.send(Ok(guard)) {
            Ok(()) => {
                self.leased += 1;
                None
            }
            Err(result) => match result {
                Ok(guard) => guard.detach(),
                Err(_) => None,
            },
        }
    }

    /// Fails every waiter whose deadline has passed.
    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let mut kept = VecDeque::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            if waiter.deadline <= now {
                trace!("lease request timed out in queue");
                let _ = waiter.reply.send(Err(PoolError::WaiterTimeout));
            } else {
                kept.push_back(waiter);
            }
        }
        self.waiters = kept;
    }

    /// Starts however many builds the current demand justifies: the `min`
    /// floor, plus waiters not already covered by an in-flight build -
    /// capped by `max` under [`PoolBehavior::Strict`]. Zero demand means
    /// zero builds: a quiescent pool does not reconnect speculatively.
    fn ensure_builds(&mut self) {
        if self.closed {
            return;
        }
        let total = self.leased + self.idle.len() + self.building;
        let mut needed = self.config.min.saturating_sub(total);

        let for_waiters = self.waiters.len().saturating_sub(self.building);
        let for_waiters = match self.config.behavior {
            PoolBehavior::Elastic => for_waiters,
            PoolBehavior::Strict => for_waiters.min(self.config.max.saturating_sub(total)),
        };
        needed = needed.max(for_waiters);

        for _ in 0..needed {
            self.spawn_build();
        }
    }

    fn spawn_build(&mut self) {
        let address = self.config.addresses[self.next_address % self.config.addresses.len()].clone();
        self.next_address = self.next_address.wrapping_add(1);
        let config = self.config.connection_config(&address);
        let delay = self.config.retry.delay_for(self.consecutive_failures);
        let connect_timeout = self.config.retry.connect_timeout;
        let build_tx = self.build_tx.clone();

        self.building += 1;
        debug!(
            "building connection to {address} (delay {delay:?}, {} in flight)",
            self.building
        );
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match tokio::time::timeout(connect_timeout, Connection::connect(&config))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(connect_timeout)),
            };
            // The pool may be gone by now; the connection then just drops.
            let _ = build_tx.send(result);
        });
    }
}
