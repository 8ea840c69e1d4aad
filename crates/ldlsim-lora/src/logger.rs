//! CSV log of every transmission on a medium.

use crate::medium::{Medium, MediumMessage, TOPIC_TX_BEGIN};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ldlsim_common::{SubscriptionId, TICKS_PER_SECOND};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

pub const CSV_HEADER: &str =
    "system_time,eui,message_type,frequency,spreading_factor,bandwidth,power,air_time,size,message";

/// LoRaWAN message type from the MHDR byte.
pub fn message_type(frame: &[u8]) -> &'static str {
    match frame.first().map(|mhdr| mhdr >> 5) {
        Some(0) => "join_request",
        Some(1) => "join_accept",
        Some(2) => "unconfirmed_up",
        Some(3) => "unconfirmed_down",
        Some(4) => "confirmed_up",
        Some(5) => "confirmed_down",
        Some(6) => "rejoin_request",
        Some(_) => "proprietary",
        None => "unknown",
    }
}

/// Writes one CSV record per `tx_begin` until dropped.
pub struct PacketLogger {
    medium: Medium,
    subscription: SubscriptionId,
}

impl PacketLogger {
    /// Write the header and start logging. Records are flushed as they are written.
    pub fn new<W>(medium: &Medium, output: W) -> std::io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let output = Arc::new(Mutex::new(output));
        {
            let mut out = output.lock();
            writeln!(out, "{}", CSV_HEADER)?;
            out.flush()?;
        }
        let subscription = medium.subscribe(TOPIC_TX_BEGIN, move |message: &MediumMessage| {
            let Some(event) = message.transmission() else {
                return;
            };
            let mut out = output.lock();
            let result = writeln!(
                out,
                "{:.6},{},{},{},{},{},{},{:.6},{},{}",
                event.start.as_secs_f64(),
                event.endpoint,
                message_type(&event.data),
                event.params.frequency_hz,
                event.params.spreading_factor,
                event.params.bandwidth_hz / 1_000,
                event.params.tx_power_dbm,
                event.airtime as f64 / TICKS_PER_SECOND as f64,
                event.data.len(),
                STANDARD.encode(&event.data)
            )
            .and_then(|_| out.flush());
            if let Err(e) = result {
                warn!("packet logger: write failed: {}", e);
            }
        });
        Ok(PacketLogger {
            medium: medium.clone(),
            subscription,
        })
    }
}

impl Drop for PacketLogger {
    fn drop(&mut self) {
        self.medium.unsubscribe(self.subscription);
    }
}
