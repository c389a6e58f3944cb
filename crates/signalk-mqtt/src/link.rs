//! Broker link.
//!
//! [`BrokerLink`] is the publisher's view of the broker: a non-blocking
//! `send` and a `close`. [`MqttLink`] implements it on a `rumqttc` client.
//!
//! The client's event loop is polled by [`drive_connection`], which turns
//! network events into [`LinkEvent`]s for the publisher and waits the
//! reconnect interval between connection attempts.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::tokio_rustls::rustls;
use rumqttc::tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use signalk_core::{BrokerUrl, Identity, PublisherOptions};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::publisher::PublisherHandle;
use crate::state::LinkEvent;
use crate::store::OutgoingMessage;

/// Capacity of the client's request queue.
const REQUEST_CAPACITY: usize = 100;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Errors returned by a broker link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Broker link unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported QoS level {0}")]
    InvalidQos(u8),
}

/// Wire side of the publisher.
pub trait BrokerLink: Send {
    /// Hand a message to the connection without waiting for the broker.
    fn send(&mut self, message: &OutgoingMessage) -> Result<(), LinkError>;

    /// Request a clean disconnect.
    fn close(&mut self) -> Result<(), LinkError>;
}

fn qos_from_level(level: u8) -> Result<QoS, LinkError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(LinkError::InvalidQos(other)),
    }
}

/// Build client options for the broker.
///
/// The session is persistent (no clean start) and identified by the vessel
/// identity, so the broker keeps it across reconnects.
pub fn mqtt_options(url: &BrokerUrl, identity: &Identity, options: &PublisherOptions) -> MqttOptions {
    let mut mqtt = MqttOptions::new(identity.as_str(), url.host.as_str(), url.port);
    mqtt.set_clean_session(false);
    mqtt.set_keep_alive(KEEP_ALIVE);

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt.set_credentials(username.clone(), password);
    }

    if url.is_tls() {
        mqtt.set_transport(tls_transport(url, options.reject_unauthorized));
    }

    mqtt
}

/// TLS transport; without `reject_unauthorized` any server certificate is
/// accepted, self-signed ones included.
fn tls_transport(url: &BrokerUrl, reject_unauthorized: bool) -> Transport {
    if reject_unauthorized {
        return Transport::tls_with_default_config();
    }

    warn!("Accepting any server certificate from {}", url);
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(config)))
}

/// Certificate verifier for `rejectUnauthorized=false`.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// [`BrokerLink`] over a `rumqttc` client.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

impl MqttLink {
    /// Create the client. Nothing touches the network until the returned
    /// event loop is driven.
    pub fn connect(
        url: &BrokerUrl,
        identity: &Identity,
        options: &PublisherOptions,
    ) -> (MqttLink, EventLoop) {
        let (client, eventloop) =
            AsyncClient::new(mqtt_options(url, identity, options), REQUEST_CAPACITY);
        (MqttLink { client }, eventloop)
    }
}

impl BrokerLink for MqttLink {
    fn send(&mut self, message: &OutgoingMessage) -> Result<(), LinkError> {
        let qos = qos_from_level(message.qos)?;
        self.client
            .try_publish(
                message.topic.as_str(),
                qos,
                message.retain,
                message.payload.as_bytes().to_vec(),
            )
            .map_err(|e| LinkError::Unavailable(e.to_string()))
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.client
            .try_disconnect()
            .map_err(|e| LinkError::Unavailable(e.to_string()))
    }
}

/// Map a client event to a link event.
fn translate(event: &Event) -> Option<LinkEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(LinkEvent::Connected),
        Event::Incoming(Packet::PubAck(ack)) => Some(LinkEvent::Acked(ack.pkid)),
        Event::Incoming(Packet::Disconnect) => Some(LinkEvent::Disconnected),
        Event::Outgoing(Outgoing::Publish(pkid)) => Some(LinkEvent::Sent(*pkid)),
        Event::Outgoing(Outgoing::Disconnect) => Some(LinkEvent::Disconnected),
        _ => None,
    }
}

/// Poll the client event loop until the link is closed or `shutdown` fires.
///
/// A failed connection is reported as `Error` then `Offline`; after
/// `reconnect_interval` the driver reports `Reconnecting` and tries again.
pub async fn drive_connection(
    mut eventloop: EventLoop,
    url: BrokerUrl,
    publisher: PublisherHandle,
    mut shutdown: watch::Receiver<bool>,
    reconnect_interval: Duration,
) {
    if publisher.link_event(LinkEvent::Connecting).await.is_err() {
        return;
    }

    loop {
        let polled = tokio::select! {
            polled = eventloop.poll() => polled,
            _ = shutdown.changed() => break,
        };

        match polled {
            Ok(event) => {
                let Some(link_event) = translate(&event) else {
                    continue;
                };
                if link_event == LinkEvent::Connected {
                    info!("Connected to {}", url);
                }
                if publisher.link_event(link_event).await.is_err() {
                    break;
                }
                if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                    break;
                }
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", url, e);
                let reported = publisher.link_event(LinkEvent::Error(e.to_string())).await.is_ok()
                    && publisher.link_event(LinkEvent::Offline).await.is_ok();
                if !reported {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(reconnect_interval) => {}
                    _ = shutdown.changed() => break,
                }

                debug!("Reconnecting to {}", url);
                if publisher.link_event(LinkEvent::Reconnecting).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Connection driver for {} stopped", url);
}
