//! Address lookups against a single monitor.
//!
//! Every lookup opens its own session, runs one or two commands, and closes
//! the session again whether the lookup succeeded or not. Sessions are never
//! reused across lookups, so a monitor that dies between two requests cannot
//! leave a half-broken connection behind.

use std::sync::Arc;

use crate::{
    connection::{MonitorSession, MonitorTransport},
    cycle::EndpointCycle,
    endpoint::{MonitorEndpoint, NodeAddress},
    error::{MalformedReplySnafu, Result},
    nat::{self, NatMap},
    resp::{self, Value},
    role::Role,
    selector::{CandidateReplica, PreferenceSpec, select_preferred},
};

/// Resolves dataset nodes by asking monitors.
#[derive(Clone)]
pub struct MonitorQueryClient {
    transport: Arc<dyn MonitorTransport>,
    nat_map: Option<NatMap>,
    preference: Option<PreferenceSpec>,
    update_monitors: bool,
}

impl MonitorQueryClient {
    /// Creates a query client.
    ///
    /// With `update_monitors`, every successful master lookup also appends
    /// newly reported monitors to the caller's cycle.
    pub fn new(
        transport: Arc<dyn MonitorTransport>,
        nat_map: Option<NatMap>,
        preference: Option<PreferenceSpec>,
        update_monitors: bool,
    ) -> Self {
        Self { transport, nat_map, preference, update_monitors }
    }

    /// Resolves the node serving `role`.
    pub async fn resolve(
        &self,
        endpoint: &MonitorEndpoint,
        role: Role,
        name: &str,
        cycle: &mut EndpointCycle,
    ) -> Result<NodeAddress> {
        match role {
            Role::Master => self.resolve_master(endpoint, name, cycle).await,
            Role::Replica => self.resolve_replica(endpoint, name).await,
        }
    }

    /// Asks `endpoint` for the current master of `name`.
    ///
    /// A nil or misshapen reply is a
    /// [`MalformedReply`](crate::SentinelError::MalformedReply) error.
    pub async fn resolve_master(
        &self,
        endpoint: &MonitorEndpoint,
        name: &str,
        cycle: &mut EndpointCycle,
    ) -> Result<NodeAddress> {
        let mut session = self.transport.open(endpoint).await?;
        let result = self.query_master(session.as_mut(), endpoint, name, cycle).await;
        session.close().await;
        result.map(|address| self.remap(address))
    }

    fn remap(&self, address: NodeAddress) -> NodeAddress {
        match self.nat_map {
            Some(ref map) => map.remap(address),
            None => address,
        }
    }

    async fn query_master(
        &self,
        session: &mut dyn MonitorSession,
        endpoint: &MonitorEndpoint,
        name: &str,
        cycle: &mut EndpointCycle,
    ) -> Result<NodeAddress> {
        let reply = session.query(&["SENTINEL", "get-master-addr-by-name", name]).await?;
        let address = parse_master_reply(&reply).ok_or_else(|| {
            MalformedReplySnafu { endpoint: endpoint.identity(), reply: reply.summary() }.build()
        })?;

        if self.update_monitors {
            self.refresh_membership(session, endpoint, name, cycle).await?;
        }

        Ok(address)
    }

    /// Appends the monitors `endpoint` knows about to `cycle`.
    ///
    /// Transport errors propagate. A reply that cannot be interpreted is
    /// logged and ignored so that the master lookup it accompanies still
    /// succeeds.
    async fn refresh_membership(
        &self,
        session: &mut dyn MonitorSession,
        endpoint: &MonitorEndpoint,
        name: &str,
        cycle: &mut EndpointCycle,
    ) -> Result<usize> {
        let reply = session.query(&["SENTINEL", "sentinels", name]).await?;
        let Some(items) = reply.as_array() else {
            tracing::warn!(
                endpoint = %endpoint,
                reply = %reply.summary(),
                "ignoring malformed monitor list"
            );
            return Ok(0);
        };

        let mut added = 0;
        for record in items.iter().filter_map(resp::pack_record) {
            let disconnected =
                record.get("flags").is_some_and(|f| f.split(',').any(|f| f == "disconnected"));
            if disconnected {
                continue;
            }
            let (Some(ip), Some(port)) =
                (record.get("ip"), record.get("port").and_then(|p| p.parse::<u16>().ok()))
            else {
                continue;
            };

            let address =
                nat::remap(self.nat_map.as_ref(), Some(NodeAddress::new(ip.clone(), port)));
            if let Some(address) = address
                && cycle.add(MonitorEndpoint::from(address))
            {
                added += 1;
            }
        }

        if added > 0 {
            tracing::debug!(endpoint = %endpoint, added, total = cycle.len(), "updated monitor list");
        }
        Ok(added)
    }

    /// Asks `endpoint` for the replicas of `name` and picks one.
    ///
    /// Replicas without flags or flagged `disconnected`, `s_down`, or
    /// `o_down` are never candidates. When nothing is selected the lookup
    /// fails with a [`MalformedReply`](crate::SentinelError::MalformedReply)
    /// error.
    pub async fn resolve_replica(
        &self,
        endpoint: &MonitorEndpoint,
        name: &str,
    ) -> Result<NodeAddress> {
        let mut session = self.transport.open(endpoint).await?;
        let result = session.query(&["SENTINEL", "replicas", name]).await;
        session.close().await;
        let reply = result?;

        let Some(items) = reply.as_array() else {
            return MalformedReplySnafu { endpoint: endpoint.identity(), reply: reply.summary() }
                .fail();
        };

        let candidates: Vec<CandidateReplica> = items
            .iter()
            .filter_map(resp::pack_record)
            .filter_map(|record| CandidateReplica::from_record(&record))
            .filter(CandidateReplica::is_available)
            .collect();

        let Some(selected) = select_preferred(&candidates, self.preference.as_ref()) else {
            let reply = format!("no usable replica among {} listed", items.len());
            return MalformedReplySnafu { endpoint: endpoint.identity(), reply }.fail();
        };

        tracing::debug!(
            endpoint = %endpoint,
            replica = %selected.address(),
            candidates = candidates.len(),
            "selected replica"
        );
        Ok(self.remap(selected.address()))
    }
}

/// Parses `[ip, port]`; anything else, including nil, is `None`.
fn parse_master_reply(reply: &Value) -> Option<NodeAddress> {
    match reply.as_array()? {
        [ip, port] => {
            let ip = ip.as_str().filter(|ip| !ip.is_empty())?;
            let port = port.as_str()?.parse().ok()?;
            Some(NodeAddress::new(ip, port))
        },
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use snafu::IntoError;

    use super::*;
    use crate::{
        error::{IoSnafu, SentinelError},
        selector::PreferredReplica,
    };

    /// Scripted transport: each query pops the next reply.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Value>>>,
        commands: Mutex<Vec<Vec<String>>>,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), ..Self::default() })
        }
    }

    struct ScriptedSession {
        transport: Arc<Scripted>,
    }

    #[async_trait]
    impl MonitorTransport for Arc<Scripted> {
        async fn open(&self, _endpoint: &MonitorEndpoint) -> Result<Box<dyn MonitorSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession { transport: Arc::clone(self) }))
        }
    }

    #[async_trait]
    impl MonitorSession for ScriptedSession {
        async fn query(&mut self, args: &[&str]) -> Result<Value> {
            self.transport.commands.lock().push(args.iter().map(|a| a.to_string()).collect());
            self.transport.replies.lock().pop_front().unwrap_or(Ok(Value::Nil))
        }

        async fn receive(&mut self) -> Result<Value> {
            Ok(Value::Nil)
        }

        async fn close(self: Box<Self>) {
            self.transport.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bulk(s: &str) -> Value {
        Value::bulk(s.to_owned())
    }

    fn record(pairs: &[(&str, &str)]) -> Value {
        Value::Array(pairs.iter().flat_map(|(k, v)| [bulk(k), bulk(v)]).collect())
    }

    fn master_reply(ip: &str, port: &str) -> Value {
        Value::Array(vec![bulk(ip), bulk(port)])
    }

    fn client(transport: &Arc<Scripted>, nat: Option<NatMap>, update: bool) -> MonitorQueryClient {
        MonitorQueryClient::new(Arc::new(Arc::clone(transport)), nat, None, update)
    }

    fn monitor() -> MonitorEndpoint {
        MonitorEndpoint::new("10.0.0.100", 26379)
    }

    #[tokio::test]
    async fn test_resolve_master_remaps_and_closes() {
        let transport = Scripted::new(vec![Ok(master_reply("10.0.0.2", "6380"))]);
        let nat = NatMap::table([("10.0.0.2:6380", NodeAddress::new("1.2.3.4", 16380))]);
        let mut cycle = EndpointCycle::new([monitor()]);

        let address = client(&transport, Some(nat), false)
            .resolve_master(&monitor(), "orders", &mut cycle)
            .await
            .unwrap();

        assert_eq!(address, NodeAddress::new("1.2.3.4", 16380));
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_eq!(transport.commands.lock()[0], vec![
            "SENTINEL",
            "get-master-addr-by-name",
            "orders"
        ]);
    }

    #[tokio::test]
    async fn test_resolve_master_nil_is_malformed() {
        let transport = Scripted::new(vec![Ok(Value::Nil)]);
        let mut cycle = EndpointCycle::default();
        let err = client(&transport, None, false)
            .resolve_master(&monitor(), "orders", &mut cycle)
            .await
            .unwrap_err();

        assert!(matches!(err, SentinelError::MalformedReply { .. }));
        assert!(err.to_string().contains("successfully, but got an invalid reply: nil"));
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1, "closed on failure too");
    }

    #[tokio::test]
    async fn test_transport_error_closes_session() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let transport = Scripted::new(vec![Err(IoSnafu { address: "m" }.into_error(reset))]);
        let mut cycle = EndpointCycle::default();
        let err = client(&transport, None, false)
            .resolve_master(&monitor(), "orders", &mut cycle)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Io { .. }));
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_membership_refresh_adds_connected_monitors() {
        let transport = Scripted::new(vec![
            Ok(master_reply("10.0.0.2", "6380")),
            Ok(Value::Array(vec![
                record(&[("ip", "10.0.0.101"), ("port", "26379"), ("flags", "sentinel")]),
                record(&[("ip", "10.0.0.102"), ("port", "26379"), ("flags", "sentinel,disconnected")]),
                record(&[("ip", "10.0.0.103"), ("flags", "sentinel")]),
                record(&[("ip", "10.0.0.100"), ("port", "26379"), ("flags", "sentinel")]),
            ])),
        ]);
        let nat = NatMap::table([("10.0.0.101:26379", NodeAddress::new("5.6.7.8", 36379))]);
        let mut cycle = EndpointCycle::new([monitor()]);

        client(&transport, Some(nat), true)
            .resolve_master(&monitor(), "orders", &mut cycle)
            .await
            .unwrap();

        let identities: Vec<String> =
            cycle.endpoints().iter().map(MonitorEndpoint::identity).collect();
        assert_eq!(identities, vec!["10.0.0.100:26379", "5.6.7.8:36379"]);
        assert_eq!(transport.commands.lock()[1], vec!["SENTINEL", "sentinels", "orders"]);
    }

    #[tokio::test]
    async fn test_malformed_membership_reply_ignored() {
        let transport = Scripted::new(vec![
            Ok(master_reply("10.0.0.2", "6380")),
            Ok(Value::Simple("OK".into())),
        ]);
        let mut cycle = EndpointCycle::new([monitor()]);
        let address = client(&transport, None, true)
            .resolve_master(&monitor(), "orders", &mut cycle)
            .await
            .unwrap();
        assert_eq!(address, NodeAddress::new("10.0.0.2", 6380));
        assert_eq!(cycle.len(), 1);
    }

    #[tokio::test]
    async fn test_membership_transport_error_fails_lookup() {
        let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let transport = Scripted::new(vec![
            Ok(master_reply("10.0.0.2", "6380")),
            Err(IoSnafu { address: "m" }.into_error(broken)),
        ]);
        let mut cycle = EndpointCycle::new([monitor()]);
        let result =
            client(&transport, None, true).resolve_master(&monitor(), "orders", &mut cycle).await;
        assert!(result.is_err());
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_disabled_sends_single_command() {
        let transport = Scripted::new(vec![Ok(master_reply("10.0.0.2", "6380"))]);
        let mut cycle = EndpointCycle::new([monitor()]);
        client(&transport, None, false)
            .resolve_master(&monitor(), "orders", &mut cycle)
            .await
            .unwrap();
        assert_eq!(transport.commands.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_replica_filters_and_prefers() {
        let transport = Scripted::new(vec![Ok(Value::Array(vec![
            record(&[("ip", "10.0.0.1"), ("port", "6380"), ("flags", "slave")]),
            record(&[("ip", "10.0.0.2"), ("port", "6380"), ("flags", "slave")]),
            record(&[("ip", "10.0.0.3"), ("port", "6380"), ("flags", "slave,s_down")]),
            record(&[("ip", "10.0.0.4"), ("port", "6380")]),
        ]))]);
        let preference = PreferenceSpec::list([
            PreferredReplica::new("10.0.0.3", 6380).with_priority(1),
            PreferredReplica::new("10.0.0.2", 6380).with_priority(2),
        ]);
        let client =
            MonitorQueryClient::new(Arc::new(Arc::clone(&transport)), None, Some(preference), false);

        let address = client.resolve_replica(&monitor(), "orders").await.unwrap();
        assert_eq!(address, NodeAddress::new("10.0.0.2", 6380), "s_down replica is never chosen");
        assert_eq!(transport.commands.lock()[0], vec!["SENTINEL", "replicas", "orders"]);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_replica_none_available() {
        let transport = Scripted::new(vec![Ok(Value::Array(vec![record(&[
            ("ip", "10.0.0.1"),
            ("port", "6380"),
            ("flags", "slave,disconnected"),
        ])]))]);
        let err =
            client(&transport, None, false).resolve_replica(&monitor(), "orders").await.unwrap_err();
        assert!(matches!(err, SentinelError::MalformedReply { .. }));
    }

    #[tokio::test]
    async fn test_resolve_replica_remaps() {
        let transport = Scripted::new(vec![Ok(Value::Array(vec![record(&[
            ("ip", "10.0.0.2"),
            ("port", "6380"),
            ("flags", "slave"),
        ])]))]);
        let nat = NatMap::table([("10.0.0.2:6380", NodeAddress::new("1.2.3.4", 16380))]);
        let address =
            client(&transport, Some(nat), false).resolve_replica(&monitor(), "orders").await.unwrap();
        assert_eq!(address, NodeAddress::new("1.2.3.4", 16380));
    }

    #[test]
    fn test_parse_master_reply_shapes() {
        assert!(parse_master_reply(&Value::Nil).is_none());
        assert!(parse_master_reply(&Value::Array(vec![bulk("10.0.0.1")])).is_none());
        assert!(parse_master_reply(&master_reply("10.0.0.1", "port")).is_none());
        assert!(parse_master_reply(&master_reply("", "6379")).is_none());
        assert_eq!(
            parse_master_reply(&master_reply("10.0.0.1", "6379")),
            Some(NodeAddress::new("10.0.0.1", 6379))
        );
    }
}
