//! Datagram transport with request, reply, publish and subscribe roles
//!
//! Every service and the client stack talk through the [`Transport`] trait;
//! [`UdpTransport`] is its only implementation.
//!
//! - **Request** sends to one server and waits for a reply with a timeout.
//!   Late replies from an earlier request are discarded before each send.
//! - **Reply** answers whoever sent the last received request.
//! - **Publish** fans a datagram out to every live subscriber. Subscribers are
//!   learned from subscribe datagrams and expire when they stop renewing.
//!   Nothing is queued: a send reaches the subscribers known at that moment.
//! - **Subscribe** announces itself to every connected publisher. With conflate
//!   enabled a receive drains everything pending and surfaces only the newest
//!   datagram.

use crate::error::{NetError, NetResult};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// First byte of a subscription (or renewal) datagram sent to a publisher
pub const SUBSCRIBE_TAG: u8 = 0xF0;

/// How long a publisher keeps a subscriber that stopped renewing
pub const SUBSCRIBER_LEASE: Duration = Duration::from_secs(3);

/// Messaging pattern a [`UdpTransport`] takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Request,
    Reply,
    Publish,
    Subscribe,
}

impl SocketRole {
    /// Lowercase name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            SocketRole::Request => "request",
            SocketRole::Reply => "reply",
            SocketRole::Publish => "publish",
            SocketRole::Subscribe => "subscribe",
        }
    }
}

/// Message-passing endpoint used by every component
pub trait Transport: Send + Sync {
    fn role(&self) -> SocketRole;

    fn local_addr(&self) -> NetResult<SocketAddr>;

    /// Request: sets the server. Subscribe: adds a publisher and announces itself.
    fn connect(&self, remote: SocketAddr) -> NetResult<()>;

    /// Subscribe: stops renewing the subscription at `remote`, so the publisher
    /// lets its lease run out. Request: forgets the server.
    fn disconnect(&self, remote: SocketAddr) -> NetResult<()>;

    /// Sends to the connected server, the last requester or every subscriber,
    /// depending on the role
    fn send(&self, bytes: &[u8]) -> NetResult<()>;

    /// Waits up to the configured timeout; `Ok(None)` when nothing arrived
    fn recv(&self, buf: &mut [u8]) -> NetResult<Option<usize>>;

    fn recv_non_blocking(&self, buf: &mut [u8]) -> NetResult<Option<usize>>;

    /// Like [`Transport::recv`], also reporting the sender's address
    fn recv_from(&self, buf: &mut [u8]) -> NetResult<Option<(usize, SocketAddr)>>;

    fn set_timeout(&self, timeout: Option<Duration>) -> NetResult<()>;

    fn set_conflate(&self, conflate: bool);

    /// Re-announces a subscriber to its publishers; no-op for other roles
    fn renew(&self) -> NetResult<()>;

    /// One request/reply exchange; `Ok(None)` when the server did not answer in time
    fn request(&self, bytes: &[u8], buf: &mut [u8]) -> NetResult<Option<usize>> {
        self.send(bytes)?;
        self.recv(buf)
    }
}

#[derive(Default)]
struct RemoteState {
    remotes: Vec<SocketAddr>,
    subscribers: HashMap<SocketAddr, Instant>,
    reply_to: Option<SocketAddr>,
}

/// [`Transport`] over one UDP socket
pub struct UdpTransport {
    socket: UdpSocket,
    role: SocketRole,
    state: Mutex<RemoteState>,
    conflate: AtomicBool,
    non_blocking: AtomicBool,
    lease: Duration,
}

fn is_idle(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}

impl UdpTransport {
    /// Binds a socket for `role`; publishers start non-blocking
    pub fn bind<A: ToSocketAddrs>(role: SocketRole, addr: A) -> NetResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        let non_blocking = role == SocketRole::Publish;
        socket.set_nonblocking(non_blocking)?;

        Ok(Self {
            socket,
            role,
            state: Mutex::new(RemoteState::default()),
            conflate: AtomicBool::new(false),
            non_blocking: AtomicBool::new(non_blocking),
            lease: SUBSCRIBER_LEASE,
        })
    }

    /// Overrides how long a publisher keeps silent subscribers
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Live subscribers after processing pending subscription datagrams
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        self.accept_subscribers(&mut state, Instant::now());
        state.subscribers.len()
    }

    fn invalid(&self, operation: &'static str) -> NetError {
        NetError::InvalidRole {
            operation,
            role: self.role.name(),
        }
    }

    fn set_blocking(&self, blocking: bool) -> NetResult<()> {
        let non_blocking = !blocking;
        if self.non_blocking.swap(non_blocking, Ordering::SeqCst) != non_blocking {
            self.socket.set_nonblocking(non_blocking)?;
        }
        Ok(())
    }

    fn recv_one(&self, buf: &mut [u8]) -> NetResult<Option<(usize, SocketAddr)>> {
        loop {
            match self.socket.recv_from(buf) {
                Ok(received) => return Ok(Some(received)),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_idle(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn receive(&self, buf: &mut [u8], blocking: bool) -> NetResult<Option<(usize, SocketAddr)>> {
        if self.role == SocketRole::Publish {
            return Err(self.invalid("recv"));
        }

        self.set_blocking(blocking)?;
        let Some((mut len, from)) = self.recv_one(buf)? else {
            return Ok(None);
        };

        match self.role {
            SocketRole::Reply => {
                self.state.lock().reply_to = Some(from);
            }
            SocketRole::Subscribe if self.conflate.load(Ordering::Relaxed) => {
                self.set_blocking(false)?;
                let mut newer = vec![0u8; buf.len()];
                while let Some((n, _)) = self.recv_one(&mut newer)? {
                    buf[..n].copy_from_slice(&newer[..n]);
                    len = n;
                }
            }
            _ => {}
        }

        Ok(Some((len, from)))
    }

    fn accept_subscribers(&self, state: &mut RemoteState, now: Instant) {
        let mut buf = [0u8; 16];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if n >= 1 && buf[0] == SUBSCRIBE_TAG && state.subscribers.insert(from, now).is_none() {
                        debug!("Subscriber {} joined", from);
                    }
                }
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(_) => break,
            }
        }

        let lease = self.lease;
        state.subscribers.retain(|addr, last_seen| {
            let live = now.duration_since(*last_seen) <= lease;
            if !live {
                debug!("Subscriber {} lease expired", addr);
            }
            live
        });
    }

    /// Drops replies that arrived after an earlier request gave up waiting
    fn discard_stale(&self) -> NetResult<()> {
        self.set_blocking(false)?;
        let mut buf = [0u8; 64];
        while self.recv_one(&mut buf)?.is_some() {}
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn role(&self) -> SocketRole {
        self.role
    }

    fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn connect(&self, remote: SocketAddr) -> NetResult<()> {
        match self.role {
            SocketRole::Request => {
                self.state.lock().remotes = vec![remote];
                Ok(())
            }
            SocketRole::Subscribe => {
                {
                    let mut state = self.state.lock();
                    if !state.remotes.contains(&remote) {
                        state.remotes.push(remote);
                    }
                }
                self.socket.send_to(&[SUBSCRIBE_TAG], remote)?;
                Ok(())
            }
            _ => Err(self.invalid("connect")),
        }
    }

    fn disconnect(&self, remote: SocketAddr) -> NetResult<()> {
        match self.role {
            SocketRole::Request | SocketRole::Subscribe => {
                let mut state = self.state.lock();
                let before = state.remotes.len();
                state.remotes.retain(|addr| *addr != remote);
                if state.remotes.len() != before {
                    debug!("Disconnected from {}", remote);
                }
                Ok(())
            }
            _ => Err(self.invalid("disconnect")),
        }
    }

    fn send(&self, bytes: &[u8]) -> NetResult<()> {
        match self.role {
            SocketRole::Request => {
                let server = self
                    .state
                    .lock()
                    .remotes
                    .first()
                    .copied()
                    .ok_or(NetError::NotConnected)?;
                self.discard_stale()?;
                self.socket.send_to(bytes, server)?;
                Ok(())
            }
            SocketRole::Reply => {
                let requester = self
                    .state
                    .lock()
                    .reply_to
                    .take()
                    .ok_or(NetError::NotConnected)?;
                self.socket.send_to(bytes, requester)?;
                Ok(())
            }
            SocketRole::Publish => {
                let subscribers: Vec<SocketAddr> = {
                    let mut state = self.state.lock();
                    self.accept_subscribers(&mut state, Instant::now());
                    state.subscribers.keys().copied().collect()
                };
                for subscriber in subscribers {
                    if let Err(e) = self.socket.send_to(bytes, subscriber) {
                        debug!("Skipped publish to {}: {}", subscriber, e);
                    }
                }
                Ok(())
            }
            SocketRole::Subscribe => Err(self.invalid("send")),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> NetResult<Option<usize>> {
        Ok(self.receive(buf, true)?.map(|(len, _)| len))
    }

    fn recv_non_blocking(&self, buf: &mut [u8]) -> NetResult<Option<usize>> {
        Ok(self.receive(buf, false)?.map(|(len, _)| len))
    }

    fn recv_from(&self, buf: &mut [u8]) -> NetResult<Option<(usize, SocketAddr)>> {
        self.receive(buf, true)
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> NetResult<()> {
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.socket.set_read_timeout(timeout)?;
        self.socket.set_write_timeout(timeout)?;
        Ok(())
    }

    fn set_conflate(&self, conflate: bool) {
        self.conflate.store(conflate, Ordering::Relaxed);
    }

    fn renew(&self) -> NetResult<()> {
        if self.role != SocketRole::Subscribe {
            return Ok(());
        }
        let remotes = self.state.lock().remotes.clone();
        for remote in remotes {
            self.socket.send_to(&[SUBSCRIBE_TAG], remote)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn loopback(role: SocketRole) -> UdpTransport {
        UdpTransport::bind(role, "127.0.0.1:0").unwrap()
    }

    fn wait_for_subscribers(publisher: &UdpTransport, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while publisher.subscriber_count() < count {
            assert!(Instant::now() < deadline, "subscribers never arrived");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_request_reply_exchange() {
        let reply = loopback(SocketRole::Reply);
        reply.set_timeout(Some(Duration::from_secs(1))).unwrap();
        let server_addr = reply.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let n = reply.recv(&mut buf).unwrap().unwrap();
            let mut answer = buf[..n].to_vec();
            answer.reverse();
            reply.send(&answer).unwrap();
        });

        let request = loopback(SocketRole::Request);
        request.set_timeout(Some(Duration::from_secs(1))).unwrap();
        request.connect(server_addr).unwrap();

        let mut buf = [0u8; 64];
        let n = request.request(&[1, 2, 3], &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], &[3, 2, 1]);
        handle.join().unwrap();
    }

    #[test]
    fn test_request_times_out_without_server() {
        let silent = loopback(SocketRole::Reply);
        let request = loopback(SocketRole::Request);
        request
            .set_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        request.connect(silent.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 16];
        assert!(request.request(&[1], &mut buf).unwrap().is_none());
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let publisher = loopback(SocketRole::Publish);
        let pub_addr = publisher.local_addr().unwrap();

        let subscribers: Vec<UdpTransport> = (0..2)
            .map(|_| {
                let sub = loopback(SocketRole::Subscribe);
                sub.set_timeout(Some(Duration::from_secs(1))).unwrap();
                sub.connect(pub_addr).unwrap();
                sub
            })
            .collect();

        wait_for_subscribers(&publisher, 2);
        publisher.send(&[4, 5, 6]).unwrap();

        for sub in &subscribers {
            let mut buf = [0u8; 16];
            let n = sub.recv(&mut buf).unwrap().unwrap();
            assert_eq!(&buf[..n], &[4, 5, 6]);
        }
    }

    #[test]
    fn test_conflating_subscriber_sees_only_newest() {
        let publisher = loopback(SocketRole::Publish);
        let sub = loopback(SocketRole::Subscribe);
        sub.set_conflate(true);
        sub.set_timeout(Some(Duration::from_secs(1))).unwrap();
        sub.connect(publisher.local_addr().unwrap()).unwrap();
        wait_for_subscribers(&publisher, 1);

        for i in 0..5u8 {
            publisher.send(&[i]).unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        let mut buf = [0u8; 16];
        let n = sub.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], &[4]);
        assert!(sub.recv_non_blocking(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_silent_subscriber_lease_expires() {
        let publisher = loopback(SocketRole::Publish).with_lease(Duration::from_millis(50));
        let sub = loopback(SocketRole::Subscribe);
        sub.connect(publisher.local_addr().unwrap()).unwrap();
        wait_for_subscribers(&publisher, 1);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(publisher.subscriber_count(), 0);

        sub.renew().unwrap();
        wait_for_subscribers(&publisher, 1);
    }

    #[test]
    fn test_disconnected_publisher_lets_lease_expire() {
        let kept = loopback(SocketRole::Publish).with_lease(Duration::from_millis(100));
        let dropped = loopback(SocketRole::Publish).with_lease(Duration::from_millis(100));
        let sub = loopback(SocketRole::Subscribe);
        sub.connect(kept.local_addr().unwrap()).unwrap();
        sub.connect(dropped.local_addr().unwrap()).unwrap();
        wait_for_subscribers(&kept, 1);
        wait_for_subscribers(&dropped, 1);

        sub.disconnect(dropped.local_addr().unwrap()).unwrap();
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(40));
            sub.renew().unwrap();
        }

        assert_eq!(kept.subscriber_count(), 1);
        assert_eq!(dropped.subscriber_count(), 0);

        sub.connect(dropped.local_addr().unwrap()).unwrap();
        wait_for_subscribers(&dropped, 1);
    }

    #[test]
    fn test_roles_reject_foreign_operations() {
        let publisher = loopback(SocketRole::Publish);
        let sub = loopback(SocketRole::Subscribe);
        let mut buf = [0u8; 4];

        assert!(matches!(
            publisher.recv_non_blocking(&mut buf),
            Err(NetError::InvalidRole { .. })
        ));
        assert!(matches!(sub.send(&[1]), Err(NetError::InvalidRole { .. })));
        assert!(matches!(
            publisher.connect(sub.local_addr().unwrap()),
            Err(NetError::InvalidRole { .. })
        ));

        assert!(matches!(
            publisher.disconnect(sub.local_addr().unwrap()),
            Err(NetError::InvalidRole { .. })
        ));

        let request = loopback(SocketRole::Request);
        assert!(matches!(request.send(&[1]), Err(NetError::NotConnected)));
    }
}
