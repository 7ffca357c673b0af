//! The BSI protocol client: connection lifecycle, card discovery, and the
//! typed command/response engine the adapter modules build on.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use benchlib_core::error::{Error, Result};
use benchlib_core::events::InstrumentEvent;
use benchlib_core::transport::Transport;
use benchlib_core::types::{CardSelect, PerCard};
use benchlib_transport::TcpTransport;
use tokio::sync::{broadcast, Mutex};

use crate::codec::{self, Decoded, Field, FieldKind};
use crate::session::{Session, DEFAULT_IO_TIMEOUT};

/// Default BSI control port.
pub const DEFAULT_PORT: u16 = 21;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection options for [`BsiClient::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// TCP port the chassis listens on.
    pub port: u16,
    /// How long to wait for the TCP connection.
    pub connect_timeout: Duration,
    /// Steady-state reply timeout.
    pub io_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// Discovery results cached at connect time.
///
/// The card count recorded here is the sole authority for how many
/// broadcast reply slots carry real cards.
#[derive(Debug, Default, Clone)]
struct ChassisInfo {
    identity: String,
    serials: Vec<String>,
    count: usize,
}

/// Client for one BSI chassis.
///
/// Owns the [`Session`] and the protocol state layered on top of it: the
/// command sequence counter, the discovered chassis inventory, and the
/// event broadcast channel.
pub struct BsiClient {
    pub(crate) session: Session,
    /// Last issued sequence number; the wire value cycles 1..=999.
    seq: AtomicU16,
    cards: Mutex<ChassisInfo>,
    event_tx: broadcast::Sender<InstrumentEvent>,
    /// `host:port` we dialed, absent for injected transports.
    endpoint: Option<String>,
    connect_timeout: Duration,
}

impl BsiClient {
    /// Connect to a chassis and run discovery.
    ///
    /// Discovery reads the identity string (`SYS_IDN`) and the per-card
    /// serial numbers (`SYS_GetBSISnr`); the number of non-empty serial
    /// slots becomes the card count used to shape every broadcast reply.
    pub async fn connect(host: &str, options: ConnectOptions) -> Result<Self> {
        let endpoint = format!("{}:{}", host, options.port);
        let transport =
            TcpTransport::connect_with_timeout(&endpoint, options.connect_timeout).await?;
        let client = Self::build(
            Box::new(transport),
            options.io_timeout,
            Some(endpoint),
            options.connect_timeout,
        );
        client.run_discovery().await?;
        let _ = client.event_tx.send(InstrumentEvent::Connected);
        Ok(client)
    }

    /// Build a client over an already-connected transport and run
    /// discovery. No endpoint is recorded, so [`reconnect`](Self::reconnect)
    /// is unavailable.
    pub async fn with_transport(
        transport: Box<dyn Transport>,
        io_timeout: Duration,
    ) -> Result<Self> {
        let client = Self::build(transport, io_timeout, None, Duration::from_secs(5));
        client.run_discovery().await?;
        let _ = client.event_tx.send(InstrumentEvent::Connected);
        Ok(client)
    }

    fn build(
        transport: Box<dyn Transport>,
        io_timeout: Duration,
        endpoint: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        BsiClient {
            session: Session::new(transport, io_timeout),
            seq: AtomicU16::new(0),
            cards: Mutex::new(ChassisInfo::default()),
            event_tx,
            endpoint,
            connect_timeout,
        }
    }

    /// Close the connection. Emits [`InstrumentEvent::Disconnected`].
    ///
    /// Disconnecting while already disconnected reports
    /// [`Error::NotConnected`].
    pub async fn disconnect(&self) -> Result<()> {
        self.session.close().await?;
        let _ = self.event_tx.send(InstrumentEvent::Disconnected);
        Ok(())
    }

    /// Re-dial the remembered endpoint and re-run discovery.
    ///
    /// The chassis may have been power-cycled since the last connection,
    /// so the cached inventory is rebuilt from scratch.
    pub async fn reconnect(&self) -> Result<()> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            Error::Transport("no endpoint recorded; client was built over an injected transport".into())
        })?;
        if self.session.is_connected().await {
            self.session.close().await?;
        }
        let transport =
            TcpTransport::connect_with_timeout(endpoint, self.connect_timeout).await?;
        self.session.replace_transport(Box::new(transport)).await;
        self.run_discovery().await?;
        let _ = self.event_tx.send(InstrumentEvent::Connected);
        Ok(())
    }

    /// Whether the connection is up.
    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    /// Subscribe to connection and operation events.
    pub fn subscribe(&self) -> broadcast::Receiver<InstrumentEvent> {
        self.event_tx.subscribe()
    }

    /// Set the steady-state reply timeout.
    pub async fn set_timeout(&self, timeout: Duration) {
        self.session.set_timeout(timeout).await;
    }

    /// Read the steady-state reply timeout.
    pub async fn timeout(&self) -> Duration {
        self.session.timeout().await
    }

    /// Number of cards found at discovery.
    pub async fn card_count(&self) -> usize {
        self.cards.lock().await.count
    }

    /// Decimal serial number strings, one per discovered card.
    pub async fn card_serials(&self) -> Vec<String> {
        self.cards.lock().await.serials.clone()
    }

    /// The chassis identity string from `SYS_IDN`.
    pub async fn identity(&self) -> String {
        self.cards.lock().await.identity.clone()
    }

    async fn run_discovery(&self) -> Result<()> {
        let idn = self.query("SYS_IDN", "").await?;
        let identity = codec::split_reply(&idn, 2).join(",");

        let snr = self.query("SYS_GetBSISnr", "").await?;
        let mut serials = Vec::new();
        for slot in codec::split_reply(&snr, 2) {
            if slot.is_empty() {
                continue;
            }
            // Serials are hex on the wire, decimal in the API.
            let value = u64::from_str_radix(slot, 16)
                .map_err(|_| Error::Protocol(format!("bad serial number field: {:?}", slot)))?;
            serials.push(value.to_string());
        }

        let mut cards = self.cards.lock().await;
        cards.identity = identity;
        cards.count = serials.len();
        cards.serials = serials;
        tracing::info!(
            identity = %cards.identity,
            cards = cards.count,
            serials = ?cards.serials,
            "Chassis discovery complete"
        );
        Ok(())
    }

    /// Next sequence number. Values cycle 1..=999; 999 wraps to 1.
    fn next_seq(&self) -> u16 {
        let prev = self
            .seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(if v >= 999 { 1 } else { v + 1 })
            })
            .unwrap_or_else(|v| v);
        if prev >= 999 {
            1
        } else {
            prev + 1
        }
    }

    /// Frame and exchange one command, returning the raw reply line.
    ///
    /// Emits an [`InstrumentEvent::Operation`] with the command name and
    /// pass/fail status.
    pub async fn query(&self, name: &str, params: &str) -> Result<String> {
        let line = codec::frame_command(name, self.next_seq(), params);
        let result = self.session.exchange(&line).await;
        let _ = self.event_tx.send(InstrumentEvent::Operation {
            description: name.to_string(),
            success: result.is_ok(),
        });
        result
    }

    /// Like [`query`](Self::query), with a temporary timeout for this one
    /// exchange (large transfers, self-calibration).
    pub async fn query_with_timeout(
        &self,
        name: &str,
        params: &str,
        timeout: Duration,
    ) -> Result<String> {
        let line = codec::frame_command(name, self.next_seq(), params);
        let result = self.session.exchange_with_timeout(&line, timeout).await;
        let _ = self.event_tx.send(InstrumentEvent::Operation {
            description: name.to_string(),
            success: result.is_ok(),
        });
        result
    }

    /// The standard address-list parameter: `1` in the selected slot(s),
    /// `0` elsewhere.
    pub(crate) fn ack_list(card: CardSelect) -> String {
        codec::per_card_list("1", "0", card)
    }

    async fn query_decoded(
        &self,
        name: &str,
        params: &str,
        kind: FieldKind,
        card: CardSelect,
    ) -> Result<Decoded> {
        let reply = self.query(name, params).await?;
        let count = self.card_count().await;
        codec::decode_reply(&reply, 2, kind, card, count)
    }

    /// Send a command with the address-list parameter and check the
    /// acknowledge: a single card's flag, or the AND over all existing
    /// cards under broadcast.
    pub async fn send_and_check(&self, name: &str, card: CardSelect) -> Result<bool> {
        let params = Self::ack_list(card);
        let decoded = self
            .query_decoded(name, &params, FieldKind::AndBool, card)
            .await?;
        Ok(decoded_to_bool(decoded))
    }

    /// Send a command carrying `value` in the selected card slot(s)
    /// (empty filler elsewhere) and check the acknowledge.
    pub async fn send_value_and_check(
        &self,
        name: &str,
        value: &str,
        card: CardSelect,
    ) -> Result<bool> {
        let params = codec::per_card_list(value, "", card);
        let decoded = self
            .query_decoded(name, &params, FieldKind::AndBool, card)
            .await?;
        Ok(decoded_to_bool(decoded))
    }

    /// Send a command carrying `value` as even-nibble hex in the selected
    /// card slot(s) and check the acknowledge.
    pub async fn send_hex_and_check(
        &self,
        name: &str,
        value: u64,
        card: CardSelect,
    ) -> Result<bool> {
        let params = codec::per_card_hex_list(value, card);
        let decoded = self
            .query_decoded(name, &params, FieldKind::AndBool, card)
            .await?;
        Ok(decoded_to_bool(decoded))
    }

    /// Query and decode the payload as floats, shaped by the selection.
    pub async fn query_floats(
        &self,
        name: &str,
        params: &str,
        card: CardSelect,
    ) -> Result<PerCard<f64>> {
        let decoded = self
            .query_decoded(name, params, FieldKind::Float, card)
            .await?;
        per_card_fields(decoded).try_map(field_to_f64)
    }

    /// Query and decode the payload as integers, shaped by the selection.
    pub async fn query_ints(
        &self,
        name: &str,
        params: &str,
        card: CardSelect,
    ) -> Result<PerCard<i64>> {
        let decoded = self
            .query_decoded(name, params, FieldKind::Int, card)
            .await?;
        per_card_fields(decoded).try_map(field_to_i64)
    }

    /// Query and decode the payload as hex fields with the given nibble
    /// grouping. Fields come back raw so callers can distinguish a single
    /// word, a word list, and an empty slot.
    pub async fn query_hex(
        &self,
        name: &str,
        params: &str,
        card: CardSelect,
        group_nibbles: usize,
    ) -> Result<PerCard<Field>> {
        let decoded = self
            .query_decoded(name, params, FieldKind::Hex { group_nibbles }, card)
            .await?;
        Ok(per_card_fields(decoded))
    }

    /// Send a command with a bare (non-per-card) parameter string and
    /// check the single acknowledge field. Chassis-wide setters reply with
    /// one flag in the first payload slot.
    pub async fn query_ack(&self, name: &str, params: &str) -> Result<bool> {
        let decoded = self
            .query_decoded(name, params, FieldKind::Bool, CardSelect::Card(1))
            .await?;
        Ok(decoded_to_bool(decoded))
    }

    /// Like [`query_floats`](Self::query_floats) under a temporary timeout,
    /// for slow whole-chassis operations such as self-calibration.
    pub async fn query_floats_with_timeout(
        &self,
        name: &str,
        params: &str,
        card: CardSelect,
        timeout: Duration,
    ) -> Result<PerCard<f64>> {
        let reply = self.query_with_timeout(name, params, timeout).await?;
        let count = self.card_count().await;
        let decoded = codec::decode_reply(&reply, 2, FieldKind::Float, card, count)?;
        per_card_fields(decoded).try_map(field_to_f64)
    }

    /// Like [`query_hex`](Self::query_hex) under a temporary timeout, for
    /// transfers whose replies take longer than the steady-state limit.
    pub async fn query_hex_with_timeout(
        &self,
        name: &str,
        params: &str,
        card: CardSelect,
        group_nibbles: usize,
        timeout: Duration,
    ) -> Result<PerCard<Field>> {
        let reply = self.query_with_timeout(name, params, timeout).await?;
        let count = self.card_count().await;
        let decoded = codec::decode_reply(&reply, 2, FieldKind::Hex { group_nibbles }, card, count)?;
        Ok(per_card_fields(decoded))
    }
}

fn decoded_to_bool(decoded: Decoded) -> bool {
    match decoded {
        Decoded::Bool(b) => b,
        Decoded::Single(field) => field.as_bool(),
        Decoded::PerCard(fields) => !fields.is_empty() && fields.iter().all(Field::as_bool),
    }
}

fn per_card_fields(decoded: Decoded) -> PerCard<Field> {
    match decoded {
        Decoded::Single(field) => PerCard::Single(field),
        Decoded::PerCard(fields) => PerCard::AllCards(fields),
        Decoded::Bool(b) => PerCard::Single(Field::Bool(b)),
    }
}

fn field_to_f64(field: Field) -> Result<f64> {
    match field {
        Field::Float(v) => Ok(v),
        Field::Int(v) => Ok(v as f64),
        other => Err(Error::Protocol(format!(
            "expected a numeric field, got {:?}",
            other
        ))),
    }
}

fn field_to_i64(field: Field) -> Result<i64> {
    match field {
        Field::Int(v) => Ok(v),
        other => Err(Error::Protocol(format!(
            "expected an integer field, got {:?}",
            other
        ))),
    }
}

/// Extract a single hex word, for registers that answer with exactly one.
pub(crate) fn field_to_word(field: Field) -> Result<u64> {
    match field {
        Field::Hex(v) => Ok(v),
        other => Err(Error::Protocol(format!(
            "expected a hex word, got {:?}",
            other
        ))),
    }
}

/// Fallible counterpart of [`PerCard::map`] for the decode paths.
pub(crate) trait TryMapPerCard<T> {
    fn try_map<U, F: FnMut(T) -> Result<U>>(self, f: F) -> Result<PerCard<U>>;
}

impl<T> TryMapPerCard<T> for PerCard<T> {
    fn try_map<U, F: FnMut(T) -> Result<U>>(self, mut f: F) -> Result<PerCard<U>> {
        match self {
            PerCard::Single(v) => Ok(PerCard::Single(f(v)?)),
            PerCard::AllCards(v) => Ok(PerCard::AllCards(
                v.into_iter().map(f).collect::<Result<Vec<U>>>()?,
            )),
        }
    }
}
