use crate::barrier::CompletionBarrier;
use crate::client::{Connection, Connector, Handler};
use crate::config::{Publication, SessionConfig};
use crate::error::{ConnectError, PublishError, SessionError};
use crate::pipeline::Pipeline;
use log::{error, info, warn};
use rumqttc::QoS;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connected,
    SubscriptionsArmed,
    Publishing,
    Draining,
    Done,
    Failed,
}

/// Registers one subscription per filter, all feeding the same handler.
/// Returns how many the connection accepted.
pub fn subscribe_all<C: Connection>(
    conn: &C,
    filters: &[String],
    qos: QoS,
    handler: &Handler,
) -> usize {
    filters
        .iter()
        .filter(|filter| match conn.subscribe(filter, qos, handler.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        })
        .count()
}

pub fn publish_once<C: Connection>(
    conn: &C,
    publication: Option<&Publication>,
    qos: QoS,
    timeout: Duration,
) -> Result<(), PublishError> {
    let Some(p) = publication else {
        info!("nothing to publish");
        return Ok(());
    };

    conn.publish(&p.topic, qos, false, p.body.as_bytes(), timeout)?;
    info!("published message successfully");
    Ok(())
}

/// Connect, subscribe, publish, wait for the expected messages, disconnect.
pub struct Session<C> {
    connector: C,
    connect_timeout: Duration,
    publish_timeout: Duration,
    state: State,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connect_timeout: CONNECT_TIMEOUT,
            publish_timeout: PUBLISH_TIMEOUT,
            state: State::Idle,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, publish: Duration) -> Self {
        self.connect_timeout = connect;
        self.publish_timeout = publish;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn run(
        &mut self,
        config: &SessionConfig,
        out: Box<dyn Write + Send>,
    ) -> Result<(), SessionError> {
        info!("Starting mqtt client");
        let conn = match self.connector.connect(config, self.connect_timeout) {
            Ok(conn) => conn,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.state = State::Connected;
        info!("connected");

        // no filters means nothing to wait for, whatever the count says
        let expected = if config.filters.is_empty() {
            0
        } else {
            config.expected
        };
        let barrier = Arc::new(CompletionBarrier::new());
        barrier.arm(expected);

        let pipeline = Arc::new(Pipeline::new(config, barrier.clone(), out));
        if config.filters.is_empty() {
            info!("No subscriptions...");
        } else {
            subscribe_all(&conn, &config.filters, config.qos, &pipeline.handler());
            info!("waiting for {} msgs.", expected);
        }
        self.state = State::SubscriptionsArmed;

        if config.publication.is_some() {
            self.state = State::Publishing;
        }
        if let Err(e) = publish_once(
            &conn,
            config.publication.as_ref(),
            config.qos,
            self.publish_timeout,
        ) {
            return Err(self.fail(e.into()));
        }

        self.state = State::Draining;
        barrier.await_drained();
        conn.disconnect();

        self.state = State::Done;
        info!("done.");
        Ok(())
    }

    fn fail(&mut self, e: SessionError) -> SessionError {
        self.state = State::Failed;
        match &e {
            SessionError::Connect(ConnectError::Timeout(_)) => {
                error!("FATAL: Not connected after timeout!")
            }
            e => error!("FATAL: {}", e),
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Message;
    use crate::config::Args;
    use crate::error::SubscribeError;
    use crate::pipeline::tests::Buffer;
    use clap::Parser;
    use std::sync::Mutex;
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    #[derive(Clone, Copy, PartialEq)]
    enum Connect {
        Ok,
        Timeout,
        Refused,
    }

    /// In-memory broker: records what the session asks for and lets the
    /// test deliver messages through the registered handlers.
    struct Fake {
        connect: Connect,
        fail_publish: bool,
        subs: Mutex<Vec<(String, Handler)>>,
        published: Mutex<Vec<(String, Vec<u8>, bool)>>,
        disconnected: Mutex<bool>,
    }

    impl Fake {
        fn new(connect: Connect, fail_publish: bool) -> Arc<Self> {
            Arc::new(Self {
                connect,
                fail_publish,
                subs: Mutex::new(vec![]),
                published: Mutex::new(vec![]),
                disconnected: Mutex::new(false),
            })
        }

        fn filters(&self) -> Vec<String> {
            self.subs.lock().unwrap().iter().map(|(f, _)| f.clone()).collect()
        }

        fn wait_for_subs(&self, n: usize) {
            let start = Instant::now();
            while self.subs.lock().unwrap().len() < n {
                assert!(start.elapsed() < Duration::from_secs(5), "subscriptions never registered");
                thread::sleep(Duration::from_millis(5));
            }
        }

        fn deliver(&self, filter: &str, topic: &str, payload: &[u8], retained: bool) {
            let handler = self
                .subs
                .lock()
                .unwrap()
                .iter()
                .find(|(f, _)| f == filter)
                .map(|(_, h)| h.clone())
                .unwrap();
            handler(Message {
                topic: topic.into(),
                payload: payload.to_vec(),
                retained,
            });
        }
    }

    struct FakeConn(Arc<Fake>);

    impl Connector for Arc<Fake> {
        type Conn = FakeConn;

        fn connect(&self, _: &SessionConfig, timeout: Duration) -> Result<FakeConn, ConnectError> {
            match self.connect {
                Connect::Ok => Ok(FakeConn(self.clone())),
                Connect::Timeout => Err(ConnectError::Timeout(timeout)),
                Connect::Refused => Err(ConnectError::Refused("NotAuthorized".into())),
            }
        }
    }

    impl Connection for FakeConn {
        fn subscribe(&self, filter: &str, _: QoS, handler: Handler) -> Result<(), SubscribeError> {
            self.0.subs.lock().unwrap().push((filter.into(), handler));
            Ok(())
        }

        fn publish(
            &self,
            topic: &str,
            _: QoS,
            retain: bool,
            body: &[u8],
            timeout: Duration,
        ) -> Result<(), PublishError> {
            if self.0.fail_publish {
                return Err(PublishError::Timeout(timeout));
            }
            self.0
                .published
                .lock()
                .unwrap()
                .push((topic.into(), body.to_vec(), retain));
            Ok(())
        }

        fn disconnect(&self) {
            *self.0.disconnected.lock().unwrap() = true;
        }
    }

    fn config(flags: &[&str]) -> SessionConfig {
        let mut argv = vec!["mqtt-probe"];
        argv.extend_from_slice(flags);
        SessionConfig::from_args(&Args::try_parse_from(argv).unwrap()).unwrap()
    }

    fn spawn(
        fake: &Arc<Fake>,
        config: SessionConfig,
    ) -> (JoinHandle<(Result<(), SessionError>, State)>, Buffer) {
        let out = Buffer::default();
        let handle = {
            let fake = fake.clone();
            let out = out.clone();
            thread::spawn(move || {
                let mut session = Session::new(fake);
                let res = session.run(&config, Box::new(out));
                (res, session.state())
            })
        };
        (handle, out)
    }

    #[test]
    fn publish_only_does_not_block() {
        let fake = Fake::new(Connect::Ok, false);
        let (handle, _) = spawn(&fake, config(&["--msg-count", "0", "--pub", "a/b", "--msg", "hi"]));
        let (res, state) = handle.join().unwrap();
        assert!(res.is_ok());
        assert_eq!(state, State::Done);
        assert_eq!(
            *fake.published.lock().unwrap(),
            vec![("a/b".to_string(), b"hi".to_vec(), false)]
        );
        assert!(fake.filters().is_empty());
        assert!(*fake.disconnected.lock().unwrap());
    }

    #[test]
    fn no_subscriptions_ignores_count() {
        let fake = Fake::new(Connect::Ok, false);
        let (handle, _) = spawn(&fake, config(&["--msg-count", "7"]));
        let (res, state) = handle.join().unwrap();
        assert!(res.is_ok());
        assert_eq!(state, State::Done);
        assert!(fake.published.lock().unwrap().is_empty());
    }

    #[test]
    fn single_message_then_exit() {
        let fake = Fake::new(Connect::Ok, false);
        let (handle, out) = spawn(&fake, config(&["--sub", "t/1", "--msg-count", "1"]));
        fake.wait_for_subs(1);
        fake.deliver("t/1", "t/1", b"payload", false);
        let (res, state) = handle.join().unwrap();
        assert!(res.is_ok());
        assert_eq!(state, State::Done);
        assert_eq!(out.text(), "payload\n");
    }

    #[test]
    fn zero_count_with_subscriptions_still_registers() {
        let fake = Fake::new(Connect::Ok, false);
        let (handle, _) = spawn(&fake, config(&["--sub", "a,b", "--msg-count", "0"]));
        let (res, _) = handle.join().unwrap();
        assert!(res.is_ok());
        assert_eq!(fake.filters(), vec!["a", "b"]);
    }

    #[test]
    fn filters_share_one_threshold() {
        let fake = Fake::new(Connect::Ok, false);
        let (handle, out) = spawn(
            &fake,
            config(&["--sub", "left/#,right/#", "--msg-count", "2", "--ignore-payload"]),
        );
        fake.wait_for_subs(2);

        let senders: Vec<_> = [("left/#", "left/x"), ("right/#", "right/y")]
            .into_iter()
            .map(|(filter, topic)| {
                let fake = fake.clone();
                thread::spawn(move || fake.deliver(filter, topic, b"abc", false))
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }

        let (res, _) = handle.join().unwrap();
        assert!(res.is_ok());
        let text = out.text();
        assert!(text.contains("retained=false, topic=left/x, size=3\n"));
        assert!(text.contains("retained=false, topic=right/y, size=3\n"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn ignored_retained_messages_do_not_count() {
        let fake = Fake::new(Connect::Ok, false);
        let (handle, out) = spawn(
            &fake,
            config(&["--sub", "s", "--msg-count", "1", "--ignore-retained"]),
        );
        fake.wait_for_subs(1);
        fake.deliver("s", "s", b"stale", true);
        fake.deliver("s", "s", b"stale", true);

        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());

        fake.deliver("s", "s", b"live", false);
        let (res, _) = handle.join().unwrap();
        assert!(res.is_ok());
        assert_eq!(out.text(), "live\n");
    }

    #[test]
    fn connect_timeout_is_fatal() {
        let fake = Fake::new(Connect::Timeout, false);
        let (handle, _) = spawn(&fake, config(&["--sub", "a", "--pub", "b"]));
        let (res, state) = handle.join().unwrap();
        assert!(matches!(
            res,
            Err(SessionError::Connect(ConnectError::Timeout(_)))
        ));
        assert_eq!(state, State::Failed);
        assert!(fake.filters().is_empty());
        assert!(fake.published.lock().unwrap().is_empty());
    }

    #[test]
    fn refused_connection_is_fatal() {
        let fake = Fake::new(Connect::Refused, false);
        let (handle, _) = spawn(&fake, config(&[]));
        let (res, _) = handle.join().unwrap();
        assert!(matches!(
            res,
            Err(SessionError::Connect(ConnectError::Refused(_)))
        ));
    }

    #[test]
    fn publish_timeout_is_configurable() {
        let fake = Fake::new(Connect::Ok, true);
        let mut session = Session::new(fake.clone())
            .with_timeouts(Duration::from_millis(250), Duration::from_millis(40));
        let res = session.run(&config(&["--pub", "b"]), Box::new(Buffer::default()));
        assert!(matches!(
            res,
            Err(SessionError::Publish(PublishError::Timeout(t))) if t == Duration::from_millis(40)
        ));
        assert_eq!(session.state(), State::Failed);
    }

    #[test]
    fn connect_timeout_is_configurable() {
        let fake = Fake::new(Connect::Timeout, false);
        let mut session =
            Session::new(fake).with_timeouts(Duration::from_millis(250), Duration::from_secs(1));
        let res = session.run(&config(&[]), Box::new(Buffer::default()));
        assert!(matches!(
            res,
            Err(SessionError::Connect(ConnectError::Timeout(t))) if t == Duration::from_millis(250)
        ));
    }

    #[test]
    fn publish_failure_skips_drain() {
        let fake = Fake::new(Connect::Ok, true);
        let (handle, _) = spawn(&fake, config(&["--sub", "a", "--pub", "b"]));
        let (res, state) = handle.join().unwrap();
        assert!(matches!(res, Err(SessionError::Publish(PublishError::Timeout(_)))));
        assert_eq!(state, State::Failed);
        assert_eq!(fake.filters(), vec!["a"]);
        assert!(!*fake.disconnected.lock().unwrap());
    }
}
