//! Commissioner - discovery of device described by onboarding payload, connection and early
//! secure channel exchange (BTP handshake over BLE, PBKDF parameter exchange).
//!
//! Discovery transports are injected using [DiscoverySource], link establishment using [Connector].

use anyhow::{Context, Result};
use std::{future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    btp,
    codec::{ByteTransport, MessageCodec},
    config::CommissionerConfig,
    discover::{DiscoveredDevice, DiscoveryMethod},
    messages::{self, Message, MessageHeader, PbkdfParamResponse, ProtocolMessageHeader},
    mrp::MessageCounter,
    onboarding::{self, OnboardingPayload},
    transport::UdpTransport,
};

/// Number of discovery workers (BLE and mDNS).
const DISCOVERY_SOURCES: usize = 2;

/// Source of discovered devices - BLE scanner or mDNS browser.
pub trait DiscoverySource: Send + Sync + 'static {
    fn discover(&self, timeout: Duration) -> impl Future<Output = Result<Vec<DiscoveredDevice>>> + Send;
}

/// Opens byte transport to discovered device.
pub trait Connector {
    type Transport: ByteTransport;
    fn connect(&self, device: &DiscoveredDevice) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Connects to mDNS discovered devices using UDP.
pub struct UdpConnector {
    local_address: String,
    receive_timeout: Duration,
}

impl UdpConnector {
    pub fn new(config: &CommissionerConfig) -> Self {
        Self {
            local_address: config.local_address.clone(),
            receive_timeout: config.receive_timeout,
        }
    }
}

impl Connector for UdpConnector {
    type Transport = UdpTransport;
    async fn connect(&self, device: &DiscoveredDevice) -> Result<UdpTransport> {
        if device.source != DiscoveryMethod::Mdns {
            anyhow::bail!("device {} is not reachable over ip", device.name);
        }
        UdpTransport::connect(&self.local_address, &device.address, self.receive_timeout).await
    }
}

/// Result of PBKDF parameter exchange - input for PASE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseParameters {
    pub exchange_id: u16,
    pub initiator_session_id: u16,
    pub responder_session_id: u16,
    pub initiator_random: Vec<u8>,
    pub responder_random: Vec<u8>,
    pub iterations: Option<u32>,
    pub salt: Option<Vec<u8>>,
    /// Raw PBKDFParamRequest payload (part of PASE transcript).
    pub request_payload: Vec<u8>,
    /// Raw PBKDFParamResponse payload (part of PASE transcript).
    pub response_payload: Vec<u8>,
    /// ATT MTU negotiated by BTP handshake.
    pub att_mtu: Option<u16>,
}

pub struct Commissioner<B: DiscoverySource, M: DiscoverySource> {
    config: CommissionerConfig,
    ble: Arc<B>,
    mdns: Arc<M>,
}

impl<B: DiscoverySource, M: DiscoverySource> Commissioner<B, M> {
    pub fn new(config: CommissionerConfig, ble: B, mdns: M) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ble: Arc::new(ble),
            mdns: Arc::new(mdns),
        })
    }

    pub fn config(&self) -> &CommissionerConfig {
        &self.config
    }

    fn spawn_source<S: DiscoverySource>(
        source: Arc<S>,
        method: DiscoveryMethod,
        enabled: bool,
        timeout: Duration,
        sender: tokio::sync::mpsc::Sender<(DiscoveryMethod, Result<Vec<DiscoveredDevice>>)>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            let result = if enabled {
                tokio::select! {
                    r = source.discover(timeout) => r,
                    _ = cancel.cancelled() => Err(anyhow::anyhow!("cancelled")),
                }
            } else {
                Ok(Vec::new())
            };
            _ = sender.send((method, result)).await;
        });
    }

    /// Run BLE and mDNS discovery concurrently and return commissionable devices matching `payload`.
    ///
    /// Failure of one source is logged. Error is returned only when both sources fail.
    pub async fn discover(&self, payload: &OnboardingPayload) -> Result<Vec<DiscoveredDevice>> {
        let timeout = self.config.discovery_timeout;
        let (sender, mut receiver) = tokio::sync::mpsc::channel(DISCOVERY_SOURCES);
        let stop = CancellationToken::new();
        Self::spawn_source(
            self.ble.clone(),
            DiscoveryMethod::Ble,
            self.config.enable_ble,
            timeout,
            sender.clone(),
            stop.child_token(),
        );
        Self::spawn_source(
            self.mdns.clone(),
            DiscoveryMethod::Mdns,
            self.config.enable_mdns,
            timeout,
            sender,
            stop.child_token(),
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let mut found = Vec::new();
        let mut failures = Vec::new();
        for _ in 0..DISCOVERY_SOURCES {
            let r = tokio::select! {
                r = receiver.recv() => r,
                _ = tokio::time::sleep_until(deadline) => {
                    log::debug!("discovery deadline reached");
                    break;
                }
            };
            let Some((method, result)) = r else {
                break;
            };
            match result {
                Ok(devices) => {
                    log::debug!("{:?} discovery returned {} devices", method, devices.len());
                    found.extend(devices);
                }
                Err(e) => {
                    log::warn!("{:?} discovery failed: {:?}", method, e);
                    failures.push(format!("{:?}: {}", method, e));
                }
            }
        }
        stop.cancel();
        if failures.len() == DISCOVERY_SOURCES {
            anyhow::bail!("all discovery sources failed ({})", failures.join(", "));
        }
        Ok(found
            .into_iter()
            .filter(|d| d.is_commissionable() && d.matches(payload))
            .collect())
    }

    /// BTP handshake (when `over_ble`) followed by PBKDF parameter exchange, bounded by commissioning timeout.
    pub async fn establish<T: ByteTransport>(&self, transport: T, over_ble: bool) -> Result<PaseParameters> {
        tokio::time::timeout(
            self.config.commissioning_timeout,
            self.establish_inner(transport, over_ble),
        )
        .await
        .context("commissioning timeout")?
    }

    async fn establish_inner<T: ByteTransport>(&self, transport: T, over_ble: bool) -> Result<PaseParameters> {
        let att_mtu = if over_ble {
            Some(btp_handshake(&transport).await.context("handshake")?)
        } else {
            None
        };
        let counter = MessageCounter::starting_at(rand::random::<u32>() & 0x0fff_ffff);
        let mut codec = MessageCodec::with_counter(transport, counter);
        codec.set_auto_ack(self.config.auto_ack);
        let mut params = pbkdf_exchange(&codec).await.context("pase")?;
        params.att_mtu = att_mtu;
        Ok(params)
    }

    /// Decode pairing code, discover matching device, connect and establish.
    pub async fn commission<C: Connector>(&self, code: &str, connector: &C) -> Result<PaseParameters> {
        let payload = onboarding::decode(code).context("decoding pairing code")?;
        log::debug!("commissioning {}", payload);
        let devices = self.discover(&payload).await.context("discovery")?;
        let device = devices.first().context("discovery: no matching device found")?;
        log::debug!("selected device {:?}", device);
        let transport = connector.connect(device).await.context("connect")?;
        self.establish(transport, device.source == DiscoveryMethod::Ble).await
    }
}

async fn btp_handshake<T: ByteTransport>(transport: &T) -> Result<u16> {
    transport.transmit(&btp::HANDSHAKE_REQUEST).await?;
    let data = transport.receive().await?;
    let resp = btp::HandshakeResponse::decode(&data)?;
    if !resp.is_handshake() {
        anyhow::bail!("unexpected handshake response {}", hex::encode(&data));
    }
    log::debug!(
        "btp handshake version:{} mtu:{} window:{}",
        resp.selected_version,
        resp.att_mtu,
        resp.window_size
    );
    Ok(resp.att_mtu)
}

async fn pbkdf_exchange<T: ByteTransport>(codec: &MessageCodec<T>) -> Result<PaseParameters> {
    let exchange_id: u16 = rand::random();
    let initiator_session_id = rand::random::<u16>().max(1);
    let initiator_random: [u8; 32] = rand::random();
    let node_id: u64 = rand::random();

    let request_payload = messages::pbkdf_param_request(&initiator_random, initiator_session_id)?;
    let request = Message::new(
        MessageHeader::new(0, 0, codec.next_message_counter()).with_source_node_id(node_id),
        ProtocolMessageHeader::new(
            ProtocolMessageHeader::FLAG_INITIATOR | ProtocolMessageHeader::FLAG_RELIABILITY,
            ProtocolMessageHeader::OPCODE_PBKDF_REQ,
            exchange_id,
            ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL,
        ),
        request_payload.clone(),
    );
    log::debug!("send pbkdf request exchange:{}", exchange_id);
    codec.transmit(&request).await?;

    let response = loop {
        let msg = codec.receive().await?;
        if msg.protocol_header.exchange_id != exchange_id {
            log::debug!("ignoring message for exchange {}", msg.protocol_header.exchange_id);
            continue;
        }
        if msg.is_standalone_ack() {
            continue;
        }
        break msg;
    };
    if let Some(status) = response.status_report()? {
        anyhow::bail!("device rejected pbkdf request: {}", status);
    }
    if !response.is_secure_channel(ProtocolMessageHeader::OPCODE_PBKDF_RESP) {
        anyhow::bail!(
            "pbkdf response not received (opcode 0x{:x})",
            response.protocol_header.opcode
        );
    }
    let parsed = PbkdfParamResponse::parse(&response.tlv()?)?;
    if parsed.initiator_random != initiator_random {
        anyhow::bail!("pbkdf response does not echo initiator random");
    }
    log::debug!(
        "pbkdf response session:{} iterations:{:?}",
        parsed.responder_session_id,
        parsed.iterations
    );
    Ok(PaseParameters {
        exchange_id,
        initiator_session_id,
        responder_session_id: parsed.responder_session_id,
        initiator_random: parsed.initiator_random,
        responder_random: parsed.responder_random,
        iterations: parsed.iterations,
        salt: parsed.salt,
        request_payload,
        response_payload: response.payload,
        att_mtu: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{discover::CommissioningMode, mrp, tlv};
    use std::{collections::VecDeque, sync::Mutex};

    struct FakeSource {
        devices: Vec<DiscoveredDevice>,
        fail: bool,
        delay: Duration,
    }

    impl FakeSource {
        fn with(devices: Vec<DiscoveredDevice>) -> Self {
            Self {
                devices,
                fail: false,
                delay: Duration::ZERO,
            }
        }
        fn failing() -> Self {
            Self {
                devices: Vec::new(),
                fail: true,
                delay: Duration::ZERO,
            }
        }
    }

    impl DiscoverySource for FakeSource {
        async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("adapter unavailable");
            }
            Ok(self.devices.clone())
        }
    }

    fn device(source: DiscoveryMethod, discriminator: u16, mode: CommissioningMode) -> DiscoveredDevice {
        DiscoveredDevice {
            name: format!("dev-{}", discriminator),
            source,
            address: "127.0.0.1:5540".to_owned(),
            vendor_id: Some(0xfff1),
            product_id: Some(0x8000),
            discriminator: Some(discriminator),
            commissioning_mode: Some(mode),
            pairing_hint: None,
        }
    }

    fn config() -> CommissionerConfig {
        CommissionerConfig {
            discovery_timeout: Duration::from_millis(200),
            commissioning_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn payload() -> OnboardingPayload {
        onboarding::decode_manual_pairing_code("34970112332").unwrap()
    }

    /// Simulated device - answers btp handshake and pbkdf request.
    #[derive(Default)]
    struct DeviceSim {
        queue: Mutex<VecDeque<Vec<u8>>>,
        sent: Mutex<Vec<Vec<u8>>>,
        reject: bool,
        wrong_random: bool,
        silent: bool,
    }

    impl DeviceSim {
        fn respond(&self, data: &[u8]) {
            if data == btp::HANDSHAKE_REQUEST {
                let resp = btp::HandshakeResponse {
                    control_flags: btp::HANDSHAKE_CONTROL_FLAGS,
                    opcode: btp::HANDSHAKE_OPCODE,
                    vendor_nibble: 0,
                    selected_version: btp::BTP_VERSION,
                    att_mtu: 247,
                    window_size: 6,
                };
                self.queue.lock().unwrap().push_back(resp.encode().to_vec());
                return;
            }
            let req = Message::decode(data).unwrap();
            if !req.is_secure_channel(ProtocolMessageHeader::OPCODE_PBKDF_REQ) {
                return;
            }
            let exchange = req.protocol_header.exchange_id;
            let source = req.message_header.source_node_id.unwrap();
            let header = MessageHeader::new(0, 0, 1000).with_destination_node_id(source);

            // unrelated exchange and standalone ack are skipped by initiator
            let other = Message::new(
                header.clone(),
                ProtocolMessageHeader::new(0, ProtocolMessageHeader::OPCODE_PBKDF_RESP, exchange.wrapping_add(1), 0),
                Vec::new(),
            );
            let ack = mrp::build_standalone_ack(&req, 999);

            let random = req.tlv().unwrap().get_octet_string(&[1]).unwrap().to_vec();
            let (opcode, payload) = if self.reject {
                // general failure, secure channel, invalid param
                (ProtocolMessageHeader::OPCODE_STATUS, vec![1, 0, 0, 0, 0, 0, 2, 0])
            } else {
                let mut t = tlv::TlvBuffer::new();
                t.write_anon_struct().unwrap();
                if self.wrong_random {
                    t.write_octetstring(1, &[0u8; 32]).unwrap();
                } else {
                    t.write_octetstring(1, &random).unwrap();
                }
                t.write_octetstring(2, &[0x55; 32]).unwrap();
                t.write_uint16(3, 0x2222).unwrap();
                t.write_struct(4).unwrap();
                t.write_uint32(1, 1000).unwrap();
                t.write_octetstring(2, b"SPAKE2P Key Salt").unwrap();
                t.write_struct_end().unwrap();
                t.write_struct_end().unwrap();
                (ProtocolMessageHeader::OPCODE_PBKDF_RESP, t.data)
            };
            let resp = Message::new(
                header,
                ProtocolMessageHeader::new(ProtocolMessageHeader::FLAG_RELIABILITY, opcode, exchange, 0)
                    .with_ack(req.message_header.message_counter),
                payload,
            );
            let mut q = self.queue.lock().unwrap();
            q.push_back(other.encode().unwrap());
            q.push_back(ack.encode().unwrap());
            q.push_back(resp.encode().unwrap());
        }
    }

    impl ByteTransport for &DeviceSim {
        async fn transmit(&self, data: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            if !self.silent {
                self.respond(data);
            }
            Ok(())
        }
        async fn receive(&self) -> Result<Vec<u8>> {
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(d) => Ok(d),
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn discover_filters() {
        let ble = FakeSource::with(vec![
            device(DiscoveryMethod::Ble, 3840, CommissioningMode::Yes),
            device(DiscoveryMethod::Ble, 0x100, CommissioningMode::Yes),
        ]);
        let mdns = FakeSource::with(vec![
            device(DiscoveryMethod::Mdns, 0xf12, CommissioningMode::WithPasscode),
            device(DiscoveryMethod::Mdns, 3840, CommissioningMode::No),
        ]);
        let c = Commissioner::new(config(), ble, mdns).unwrap();
        let found = c.discover(&payload()).await.unwrap();
        let mut discriminators: Vec<_> = found.iter().map(|d| d.discriminator.unwrap()).collect();
        discriminators.sort();
        assert_eq!(discriminators, vec![3840, 0xf12]);
    }

    #[tokio::test]
    async fn discover_one_source_failing() {
        let mdns = FakeSource::with(vec![device(DiscoveryMethod::Mdns, 3840, CommissioningMode::Yes)]);
        let c = Commissioner::new(config(), FakeSource::failing(), mdns).unwrap();
        let found = c.discover(&payload()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, DiscoveryMethod::Mdns);
    }

    #[tokio::test]
    async fn discover_all_failing() {
        let c = Commissioner::new(config(), FakeSource::failing(), FakeSource::failing()).unwrap();
        let e = c.discover(&payload()).await.unwrap_err();
        assert!(e.to_string().contains("all discovery sources failed"));
    }

    #[tokio::test]
    async fn discover_deadline() {
        let mut slow = FakeSource::with(vec![device(DiscoveryMethod::Ble, 3840, CommissioningMode::Yes)]);
        slow.delay = Duration::from_secs(30);
        let mdns = FakeSource::with(vec![device(DiscoveryMethod::Mdns, 3840, CommissioningMode::Yes)]);
        let c = Commissioner::new(config(), slow, mdns).unwrap();
        let start = std::time::Instant::now();
        let found = c.discover(&payload()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, DiscoveryMethod::Mdns);
    }

    #[tokio::test]
    async fn discover_disabled_source() {
        let cfg = CommissionerConfig {
            enable_ble: false,
            ..config()
        };
        let ble = FakeSource::with(vec![device(DiscoveryMethod::Ble, 3840, CommissioningMode::Yes)]);
        let c = Commissioner::new(cfg, ble, FakeSource::failing()).unwrap();
        assert!(c.discover(&payload()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn establish_over_ble() {
        let sim = DeviceSim::default();
        let c = Commissioner::new(config(), FakeSource::with(vec![]), FakeSource::with(vec![])).unwrap();
        let params = c.establish(&sim, true).await.unwrap();
        assert_eq!(params.att_mtu, Some(247));
        assert_eq!(params.responder_session_id, 0x2222);
        assert_eq!(params.iterations, Some(1000));
        assert_eq!(params.salt.as_deref(), Some(&b"SPAKE2P Key Salt"[..]));
        assert_eq!(params.responder_random, vec![0x55; 32]);
        assert_ne!(params.initiator_session_id, 0);

        let sent = sim.sent.lock().unwrap().clone();
        assert_eq!(sent[0], btp::HANDSHAKE_REQUEST.to_vec());
        let req = Message::decode(&sent[1]).unwrap();
        assert_eq!(req.payload, params.request_payload);
        assert_eq!(req.protocol_header.exchange_id, params.exchange_id);
        // reliable response was acknowledged
        let ack = Message::decode(sent.last().unwrap()).unwrap();
        assert!(ack.is_standalone_ack());
        assert_eq!(ack.protocol_header.ack_counter, Some(1000));
    }

    #[tokio::test]
    async fn establish_over_ip() {
        let sim = DeviceSim::default();
        let c = Commissioner::new(config(), FakeSource::with(vec![]), FakeSource::with(vec![])).unwrap();
        let params = c.establish(&sim, false).await.unwrap();
        assert_eq!(params.att_mtu, None);
        let sent = sim.sent.lock().unwrap().clone();
        assert!(Message::decode(&sent[0]).unwrap().is_secure_channel(ProtocolMessageHeader::OPCODE_PBKDF_REQ));
    }

    #[tokio::test]
    async fn establish_failures() {
        let c = Commissioner::new(config(), FakeSource::with(vec![]), FakeSource::with(vec![])).unwrap();

        let sim = DeviceSim {
            reject: true,
            ..Default::default()
        };
        let e = c.establish(&sim, false).await.unwrap_err();
        assert_eq!(e.to_string(), "pase");
        assert!(format!("{:?}", e).contains("device rejected pbkdf request"));

        let sim = DeviceSim {
            wrong_random: true,
            ..Default::default()
        };
        let e = c.establish(&sim, false).await.unwrap_err();
        assert!(format!("{:?}", e).contains("initiator random"));

        let sim = DeviceSim {
            silent: true,
            ..Default::default()
        };
        let e = c.establish(&sim, true).await.unwrap_err();
        assert!(e.to_string().contains("commissioning timeout"));
    }

    struct SimConnector<'a>(&'a DeviceSim);

    impl<'a> Connector for SimConnector<'a> {
        type Transport = &'a DeviceSim;
        async fn connect(&self, _device: &DiscoveredDevice) -> Result<&'a DeviceSim> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn commission_flow() {
        let sim = DeviceSim::default();
        let ble = FakeSource::with(vec![device(DiscoveryMethod::Ble, 3840, CommissioningMode::Yes)]);
        let c = Commissioner::new(config(), ble, FakeSource::with(vec![])).unwrap();
        let params = c.commission("3497-011-2332", &SimConnector(&sim)).await.unwrap();
        assert_eq!(params.att_mtu, Some(247));

        let e = c.commission("3497-011-2333", &SimConnector(&sim)).await.unwrap_err();
        assert_eq!(e.to_string(), "decoding pairing code");

        let c = Commissioner::new(config(), FakeSource::with(vec![]), FakeSource::with(vec![])).unwrap();
        let e = c.commission("3497-011-2332", &SimConnector(&sim)).await.unwrap_err();
        assert!(e.to_string().contains("no matching device"));
    }

    #[tokio::test]
    async fn udp_connector_rejects_ble() {
        let connector = UdpConnector::new(&config());
        let dev = device(DiscoveryMethod::Ble, 3840, CommissioningMode::Yes);
        assert!(connector.connect(&dev).await.is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = CommissionerConfig {
            discovery_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(Commissioner::new(cfg, FakeSource::with(vec![]), FakeSource::with(vec![])).is_err());
    }
}
