//! # DSU Server Module
//!
//! The UDP request/response and push loop.
//!
//! This module handles:
//! - Receiving and decoding client requests
//! - Answering version, port info, pad data and motor requests
//! - Tracking client subscriptions and expiring silent clients
//! - Pushing pad data when slots change and on a periodic refresh
//! - Announcing slots that connect, disconnect or are retired

pub mod registry;
pub mod transport;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::controller::state::ControllerState;
use crate::controller::store::{SlotEvent, SlotStore};
use crate::dsu::decoder::decode_packet;
use crate::dsu::encoder::encode_server_message;
use crate::dsu::protocol::{
    DsuMessage, Registration, SlotHeader, DSU_MAX_DATAGRAM_SIZE, DSU_MAX_REPORTED_SLOTS,
    DSU_PROTOCOL_VERSION,
};
use crate::error::{DsuError, Result};
use crate::lifecycle::SlotLifecycle;
use registry::ClientRegistry;
use transport::DatagramTransport;

/// Timing and identity settings of the server loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub server_id: u32,
    pub client_timeout: Duration,
    pub sweep_interval: Duration,
    pub push_on_change: bool,
    /// `None` disables the periodic refresh
    pub push_interval: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServerOptions {
    fn from(config: &Config) -> Self {
        Self {
            server_id: config.server_id(),
            client_timeout: config.client_timeout(),
            sweep_interval: config.sweep_interval(),
            push_on_change: config.push.on_change,
            push_interval: config.push_interval(),
        }
    }
}

/// Datagram counters, logged at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub received: u64,
    pub dropped: u64,
    pub sent: u64,
    pub send_failures: u64,
}

/// DSU server bound to a datagram transport
pub struct DsuServer<T: DatagramTransport> {
    transport: T,
    store: SlotStore,
    lifecycle: SlotLifecycle,
    events: mpsc::UnboundedReceiver<SlotEvent>,
    registry: ClientRegistry,
    options: ServerOptions,
    /// Slots last announced as connected
    advertised: HashSet<u32>,
    /// Slots past 255 already warned about
    unreportable: HashSet<u32>,
    stats: ServerStats,
}

impl DsuServer<UdpSocket> {
    /// Bind a UDP socket at `addr` and build a server on it
    ///
    /// # Errors
    ///
    /// Returns `Bind` if the socket cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        lifecycle: SlotLifecycle,
        events: mpsc::UnboundedReceiver<SlotEvent>,
        options: ServerOptions,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DsuError::Bind { addr, source })?;
        Ok(Self::new(socket, lifecycle, events, options))
    }
}

impl<T: DatagramTransport> DsuServer<T> {
    pub fn new(
        transport: T,
        lifecycle: SlotLifecycle,
        events: mpsc::UnboundedReceiver<SlotEvent>,
        options: ServerOptions,
    ) -> Self {
        Self {
            transport,
            store: lifecycle.store().clone(),
            lifecycle,
            events,
            registry: ClientRegistry::new(options.client_timeout),
            options,
            advertised: HashSet::new(),
            unreportable: HashSet::new(),
            stats: ServerStats::default(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Serve until `shutdown` is cancelled
    ///
    /// Receive errors are logged and the loop keeps going.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ServerStats> {
        let mut buf = vec![0u8; DSU_MAX_DATAGRAM_SIZE];

        let mut sweep = interval(self.options.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut push = self.options.push_interval.map(|period| {
            let mut push = interval(period);
            push.set_missed_tick_behavior(MissedTickBehavior::Skip);
            push
        });

        info!(
            "DSU server {:08X} listening on {}",
            self.options.server_id,
            self.local_addr()?
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping DSU server");
                    break;
                }

                received = self.transport.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                    Err(e) => warn!("UDP receive error: {}", e),
                },

                Some(event) = self.events.recv() => self.handle_event(event).await,

                _ = next_tick(&mut push) => self.push_all().await,

                _ = sweep.tick() => self.sweep(),
            }
        }

        info!(
            "DSU server stopped: {} received, {} dropped, {} sent, {} send failures",
            self.stats.received, self.stats.dropped, self.stats.sent, self.stats.send_failures
        );
        Ok(self.stats)
    }

    fn now() -> std::time::Instant {
        Instant::now().into_std()
    }

    /// Decode one datagram from `from` and answer it
    pub async fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        self.stats.received += 1;
        let now = Self::now();

        let packet = match decode_packet(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.dropped += 1;
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        match packet.message {
            DsuMessage::VersionRequest => {
                self.registry.touch(from, now);
                let version = DsuMessage::VersionResponse {
                    version: DSU_PROTOCOL_VERSION,
                };
                self.send(from, version).await;
            }

            DsuMessage::PortInfoRequest { slots } => {
                self.registry.touch(from, now);
                for slot in slots {
                    let state = self.store.get_or_create(slot as u32);
                    if let Some(header) = state.slot_header() {
                        self.send(from, DsuMessage::PortInfo(header)).await;
                    }
                }
            }

            DsuMessage::PadDataRequest(registration) => {
                self.registry.subscribe(from, &registration, now);
                for slot in self.matching_slots(&registration) {
                    self.send_pad_data(slot, from).await;
                }
            }

            DsuMessage::MotorInfoRequest(registration) => {
                self.registry.touch(from, now);
                for slot in self.matching_slots(&registration) {
                    let state = self.store.read(slot);
                    if let Some(message) = motor_info(&state) {
                        self.send(from, message).await;
                    }
                }
            }

            DsuMessage::RumbleCommand {
                registration,
                motor_id,
                intensity,
            } => {
                self.registry.touch(from, now);
                for slot in self.matching_slots(&registration) {
                    let applied = self
                        .store
                        .mutate(slot, |state| state.set_rumble(motor_id, intensity, now));
                    if applied {
                        debug!("Rumble motor {} of slot {} set to {}", motor_id, slot, intensity);
                    }
                }
            }

            other => {
                self.stats.dropped += 1;
                debug!(
                    "Ignoring server-direction message {:#08x} from {}",
                    other.message_type(),
                    from
                );
            }
        }
    }

    /// Slots addressed by a registration
    ///
    /// A slot registration allocates its slot; MAC and all-slot registrations
    /// only match slots that already exist.
    fn matching_slots(&self, registration: &Registration) -> Vec<u32> {
        if registration.is_all() {
            return self
                .store
                .slots()
                .into_iter()
                .filter(|slot| *slot < DSU_MAX_REPORTED_SLOTS)
                .collect();
        }

        let mut slots = Vec::new();
        if registration.by_slot {
            let slot = registration.slot as u32;
            self.store.get_or_create(slot);
            slots.push(slot);
        }
        if registration.by_mac {
            for slot in self.store.slots() {
                let matches = self
                    .store
                    .peek(slot)
                    .is_some_and(|state| state.mac == registration.mac);
                if matches && !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        }
        slots
    }

    async fn handle_event(&mut self, event: SlotEvent) {
        match event {
            SlotEvent::Changed(slot) => {
                self.store.clear_dirty(slot);
                let Some(state) = self.store.peek(slot) else {
                    return;
                };
                self.update_advertisement(&state).await;
                if self.options.push_on_change && state.status.is_active() {
                    self.push_slot(slot).await;
                }
            }

            SlotEvent::DisconnectRequested(slot) => {
                if self.lifecycle.retire(slot).is_none() {
                    return;
                }
                self.advertised.remove(&slot);
                if let Ok(wire_slot) = u8::try_from(slot) {
                    let header = SlotHeader::disconnected(wire_slot);
                    self.broadcast(DsuMessage::PortInfo(header)).await;
                }
            }
        }
    }

    /// Tell active clients about slots that connected or disconnected
    async fn update_advertisement(&mut self, state: &ControllerState) {
        let active = state.status.is_active();
        let known = self.advertised.contains(&state.slot);
        if active == known {
            return;
        }

        if active {
            self.advertised.insert(state.slot);
        } else {
            self.advertised.remove(&state.slot);
        }

        match state.slot_header() {
            Some(header) => {
                info!(
                    "Slot {} {}",
                    state.slot,
                    if active { "connected" } else { "disconnected" }
                );
                self.broadcast(DsuMessage::PortInfo(header)).await;
            }
            None => self.warn_unreportable(state.slot),
        }
    }

    async fn broadcast(&mut self, message: DsuMessage) {
        for addr in self.registry.active_clients(Self::now()) {
            self.send(addr, message.clone()).await;
        }
    }

    /// Push the current state of `slot` to every subscriber
    async fn push_slot(&mut self, slot: u32) {
        let Some(state) = self.store.peek(slot) else {
            return;
        };
        let Some(wire_slot) = state.wire_slot() else {
            self.warn_unreportable(slot);
            return;
        };

        let subscribers = self.registry.subscribers_for(wire_slot, &state.mac, Self::now());
        for addr in subscribers {
            self.send_pad_data(slot, addr).await;
        }
    }

    /// Periodic refresh of every active slot
    async fn push_all(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        for slot in self.store.slots() {
            if self.store.peek(slot).is_some_and(|state| state.status.is_active()) {
                self.push_slot(slot).await;
            }
        }
    }

    /// Send one pad data report, advancing the slot's packet counter
    async fn send_pad_data(&mut self, slot: u32, addr: SocketAddr) {
        let Some(state) = self.store.next_pad_snapshot(slot) else {
            return;
        };
        match state.pad_data() {
            Some(pad) => {
                self.send(addr, DsuMessage::PadData(pad)).await;
            }
            None => self.warn_unreportable(slot),
        }
    }

    fn sweep(&mut self) {
        let now = Self::now();
        let expired = self.registry.sweep(now);
        for addr in expired {
            info!("DSU client {} timed out", addr);
        }
        self.store.decay_rumble(now, self.registry.timeout());
    }

    fn warn_unreportable(&mut self, slot: u32) {
        if self.unreportable.insert(slot) {
            warn!("Slot {} cannot be reported over DSU (limit is 255)", slot);
        }
    }

    /// Encode and send; a failed send forgets the client
    async fn send(&mut self, addr: SocketAddr, message: DsuMessage) -> bool {
        let bytes = encode_server_message(self.options.server_id, message);
        match self.transport.send_to(&bytes, addr).await {
            Ok(_) => {
                self.stats.sent += 1;
                true
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!("Failed to send to {}: {}, dropping client", addr, e);
                self.registry.forget(&addr);
                false
            }
        }
    }
}

fn motor_info(state: &ControllerState) -> Option<DsuMessage> {
    let header = state.slot_header()?;
    let motor_count = if state.status.is_active() {
        state.motor_count()
    } else {
        0
    };
    Some(DsuMessage::MotorInfo { header, motor_count })
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mocks::RecordingTransport;
    use super::transport::MockDatagramTransport;
    use super::*;
    use crate::controller::state::{Button, ConnectionType, SlotStatus};
    use crate::dsu::encoder::encode_packet;
    use crate::dsu::protocol::{DsuPacket, PadData, SlotState};
    use crate::lifecycle::catalog::ScriptCatalog;
    use std::io;

    const CLIENT_ID: u32 = 0xC11E_0001;

    fn client(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn request(message: DsuMessage) -> Vec<u8> {
        encode_packet(&DsuPacket::new(CLIENT_ID, message))
    }

    fn test_options() -> ServerOptions {
        ServerOptions {
            server_id: 0x5E4F_E401,
            client_timeout: Duration::from_millis(5000),
            sweep_interval: Duration::from_millis(1000),
            push_on_change: true,
            push_interval: None,
        }
    }

    fn create_server() -> (DsuServer<RecordingTransport>, RecordingTransport, SlotStore) {
        let (store, events) = SlotStore::new();
        let lifecycle = SlotLifecycle::new(store.clone(), ScriptCatalog::with_builtins());
        let (transport, _inbound) = RecordingTransport::new();
        let server = DsuServer::new(transport.clone(), lifecycle, events, test_options());
        (server, transport, store)
    }

    fn decode_sent(sent: &[(SocketAddr, Vec<u8>)]) -> Vec<(SocketAddr, DsuMessage)> {
        sent.iter()
            .map(|(addr, bytes)| {
                let packet = decode_packet(bytes).unwrap();
                assert_eq!(packet.sender_id, 0x5E4F_E401);
                (*addr, packet.message)
            })
            .collect()
    }

    fn pad_of(message: &DsuMessage) -> &PadData {
        match message {
            DsuMessage::PadData(pad) => pad,
            other => panic!("expected pad data, got {:?}", other),
        }
    }

    async fn drain_events(server: &mut DsuServer<RecordingTransport>) {
        while let Ok(event) = server.events.try_recv() {
            server.handle_event(event).await;
        }
    }

    #[tokio::test]
    async fn test_version_request() {
        let (mut server, transport, _store) = create_server();
        server.handle_datagram(&request(DsuMessage::VersionRequest), client(1)).await;

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent, vec![(client(1), DsuMessage::VersionResponse { version: 1001 })]);
        assert!(server.registry().contains(&client(1)));
    }

    #[tokio::test]
    async fn test_malformed_datagram_dropped() {
        let (mut server, transport, _store) = create_server();
        let mut bytes = request(DsuMessage::VersionRequest);
        bytes[9] ^= 0xFF;

        server.handle_datagram(&bytes, client(1)).await;
        server.handle_datagram(b"garbage", client(1)).await;

        assert!(transport.take_sent().is_empty());
        assert!(server.registry().is_empty());
        assert_eq!(server.stats().dropped, 2);
        assert_eq!(server.stats().received, 2);
    }

    #[tokio::test]
    async fn test_port_info_idle_slot() {
        let (mut server, transport, store) = create_server();
        store.set_status(1, SlotStatus::Idle);

        server
            .handle_datagram(&request(DsuMessage::PortInfoRequest { slots: vec![1] }), client(1))
            .await;

        let sent = decode_sent(&transport.take_sent());
        let DsuMessage::PortInfo(header) = &sent[0].1 else {
            panic!("expected port info");
        };
        assert_eq!(header.slot, 1);
        assert_eq!(header.state, SlotState::Connected);
        assert_eq!(header.connection_type, crate::dsu::protocol::WireConnectionType::NotApplicable);
        assert_eq!(header.mac, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x02]);
    }

    #[tokio::test]
    async fn test_port_info_allocates_and_is_idempotent() {
        let (mut server, transport, store) = create_server();
        let bytes = request(DsuMessage::PortInfoRequest { slots: vec![7, 7] });

        server.handle_datagram(&bytes, client(1)).await;
        server.handle_datagram(&bytes, client(1)).await;

        assert!(store.contains(7));
        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent.len(), 4);
        for (_, message) in &sent {
            assert_eq!(message, &DsuMessage::PortInfo(SlotHeader::disconnected(7)));
        }
    }

    #[tokio::test]
    async fn test_pad_request_reports_every_known_slot() {
        let (mut server, transport, store) = create_server();
        store.set_status(0, SlotStatus::Connected);
        store.get_or_create(1);
        drain_events(&mut server).await;
        transport.take_sent();

        server
            .handle_datagram(&request(DsuMessage::PadDataRequest(Registration::all())), client(1))
            .await;

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent.len(), 2);
        let active = pad_of(&sent[0].1);
        assert_eq!(active.header.slot, 0);
        assert!(active.connected);
        assert_eq!(active.packet_counter, 1);

        let unconfigured = pad_of(&sent[1].1);
        assert!(!unconfigured.connected);
        assert_eq!(unconfigured.header, SlotHeader::disconnected(1));
    }

    #[tokio::test]
    async fn test_pad_request_reports_disconnected_and_new_slots() {
        let (mut server, transport, store) = create_server();
        store.set_status(1, SlotStatus::Disconnected);
        drain_events(&mut server).await;
        transport.take_sent();

        for slot in [1u8, 9] {
            let bytes = request(DsuMessage::PadDataRequest(Registration::slot(slot)));
            server.handle_datagram(&bytes, client(1)).await;
        }

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent.len(), 2);
        for ((_, message), slot) in sent.iter().zip([1u8, 9]) {
            let pad = pad_of(message);
            assert!(!pad.connected);
            assert_eq!(pad.header, SlotHeader::disconnected(slot));
        }
        assert!(store.contains(9));
    }

    #[tokio::test]
    async fn test_pad_request_by_mac() {
        let (mut server, transport, store) = create_server();
        store.set_status(2, SlotStatus::Connected);
        store.set_status(3, SlotStatus::Connected);
        drain_events(&mut server).await;

        let registration = Registration::mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x04]);
        server
            .handle_datagram(&request(DsuMessage::PadDataRequest(registration)), client(1))
            .await;

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent.len(), 1);
        assert_eq!(pad_of(&sent[0].1).header.slot, 3);
    }

    #[tokio::test]
    async fn test_change_pushes_to_subscribers_only() {
        let (mut server, transport, store) = create_server();
        store.set_status(0, SlotStatus::Connected);
        store.set_status(1, SlotStatus::Connected);
        drain_events(&mut server).await;

        server
            .handle_datagram(&request(DsuMessage::PadDataRequest(Registration::slot(0))), client(1))
            .await;
        server
            .handle_datagram(&request(DsuMessage::PadDataRequest(Registration::slot(1))), client(2))
            .await;
        transport.take_sent();

        store.mutate(0, |state| state.press(Button::Circle));
        drain_events(&mut server).await;

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, client(1));
        assert_eq!(pad_of(&sent[0].1).buttons2, 0x20);
    }

    #[tokio::test]
    async fn test_counter_strictly_increases() {
        let (mut server, transport, store) = create_server();
        store.set_status(0, SlotStatus::Connected);
        drain_events(&mut server).await;

        let subscribe = request(DsuMessage::PadDataRequest(Registration::slot(0)));
        server.handle_datagram(&subscribe, client(1)).await;
        for _ in 0..5 {
            store.mutate(0, |state| state.left_stick[0] = state.left_stick[0].wrapping_add(1));
            drain_events(&mut server).await;
            server.handle_datagram(&subscribe, client(1)).await;
        }

        let counters: Vec<u32> = decode_sent(&transport.take_sent())
            .iter()
            .filter(|(_, message)| matches!(message, DsuMessage::PadData(_)))
            .map(|(_, message)| pad_of(message).packet_counter)
            .collect();
        assert_eq!(counters.len(), 11);
        assert!(counters.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[tokio::test]
    async fn test_new_slot_announced_to_clients() {
        let (mut server, transport, store) = create_server();
        server.handle_datagram(&request(DsuMessage::VersionRequest), client(1)).await;
        transport.take_sent();

        store.set_status(4, SlotStatus::Connected);
        drain_events(&mut server).await;

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(sent.len(), 1);
        let DsuMessage::PortInfo(header) = &sent[0].1 else {
            panic!("expected port info");
        };
        assert_eq!(header.slot, 4);
        assert_eq!(header.state, SlotState::Connected);

        // Further changes do not re-announce
        store.mutate(4, |state| state.press(Button::L1));
        drain_events(&mut server).await;
        assert!(transport.take_sent().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_request_retires_slot() {
        let (mut server, transport, store) = create_server();
        store.set_status(2, SlotStatus::Connected);
        server
            .handle_datagram(&request(DsuMessage::PadDataRequest(Registration::slot(2))), client(1))
            .await;
        drain_events(&mut server).await;
        transport.take_sent();

        store.mutate(2, |state| state.connection_type = ConnectionType::Disconnect);
        drain_events(&mut server).await;

        let sent = decode_sent(&transport.take_sent());
        assert_eq!(
            sent.last().map(|(_, message)| message.clone()),
            Some(DsuMessage::PortInfo(SlotHeader::disconnected(2)))
        );
        assert!(!store.contains(2));
        assert!(!server.advertised.contains(&2));
    }

    #[tokio::test]
    async fn test_motor_info() {
        let (mut server, transport, store) = create_server();
        store.set_status(0, SlotStatus::Connected);
        drain_events(&mut server).await;

        for slot in [0u8, 1] {
            let bytes = request(DsuMessage::MotorInfoRequest(Registration::slot(slot)));
            server.handle_datagram(&bytes, client(1)).await;
        }

        let sent = decode_sent(&transport.take_sent());
        assert!(matches!(sent[0].1, DsuMessage::MotorInfo { motor_count: 2, .. }));
        assert_eq!(
            sent[1].1,
            DsuMessage::MotorInfo {
                header: SlotHeader::disconnected(1),
                motor_count: 0
            }
        );
    }

    #[tokio::test]
    async fn test_rumble_command_recorded() {
        let (mut server, _transport, store) = create_server();
        store.set_status(0, SlotStatus::Connected);

        let bytes = request(DsuMessage::RumbleCommand {
            registration: Registration::slot(0),
            motor_id: 1,
            intensity: 180,
        });
        server.handle_datagram(&bytes, client(1)).await;

        assert_eq!(store.read(0).motors[1].intensity, 180);
    }

    #[tokio::test]
    async fn test_send_failure_forgets_client() {
        let (store, events) = SlotStore::new();
        let lifecycle = SlotLifecycle::new(store.clone(), ScriptCatalog::empty());

        let mut transport = MockDatagramTransport::new();
        transport
            .expect_send_to()
            .times(1)
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")));

        let mut server = DsuServer::new(transport, lifecycle, events, test_options());
        server.handle_datagram(&request(DsuMessage::VersionRequest), client(1)).await;

        assert!(!server.registry().contains(&client(1)));
        assert_eq!(server.stats().send_failures, 1);
    }

    #[tokio::test]
    async fn test_high_slots_never_reported() {
        let (mut server, transport, store) = create_server();
        server
            .handle_datagram(&request(DsuMessage::PadDataRequest(Registration::all())), client(1))
            .await;
        transport.take_sent();

        store.set_status(300, SlotStatus::Connected);
        drain_events(&mut server).await;
        server.push_all().await;

        assert!(transport.take_sent().is_empty());
        assert!(server.unreportable.contains(&300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_periodic_push_and_shutdown() {
        let (store, events) = SlotStore::new();
        let lifecycle = SlotLifecycle::new(store.clone(), ScriptCatalog::empty());
        let (transport, inbound) = RecordingTransport::new();
        let options = ServerOptions {
            push_on_change: false,
            push_interval: Some(Duration::from_millis(100)),
            ..test_options()
        };
        let server = DsuServer::new(transport.clone(), lifecycle, events, options);

        store.set_status(0, SlotStatus::Connected);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        inbound
            .send((client(1), request(DsuMessage::PadDataRequest(Registration::slot(0)))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;

        shutdown.cancel();
        let stats = handle.await.unwrap().unwrap();

        let pads = decode_sent(&transport.take_sent())
            .into_iter()
            .filter(|(_, message)| matches!(message, DsuMessage::PadData(_)))
            .count();
        assert!(pads >= 4, "expected periodic pushes, got {}", pads);
        assert_eq!(stats.received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_expires_silent_subscriber() {
        let (store, events) = SlotStore::new();
        let lifecycle = SlotLifecycle::new(store.clone(), ScriptCatalog::empty());
        let (transport, inbound) = RecordingTransport::new();
        let options = ServerOptions {
            client_timeout: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(100),
            push_interval: Some(Duration::from_millis(50)),
            ..test_options()
        };
        let server = DsuServer::new(transport.clone(), lifecycle, events, options);

        store.set_status(0, SlotStatus::Connected);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        inbound
            .send((client(1), request(DsuMessage::PadDataRequest(Registration::slot(0)))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        transport.take_sent();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.take_sent().is_empty());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
