//! Physical connections to one StrataDB server.
//!
//! A transport owns one lock-step control connection for unary calls and
//! dials a fresh duplex connection for every transaction stream. TLS is
//! optional; a configured root CA file replaces the system trust store.

use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;

use crate::connection::multiplexer::{BoxedRead, BoxedWrite};
use crate::error::{DriverError, DriverResult};
use crate::options::DriverOptions;
use crate::protocol::{
    write_magic, ControlBody, ControlRequest, ControlResponse, FrameReader, FrameWriter,
};

struct ControlChannel {
    reader: FrameReader<BoxedRead>,
    writer: FrameWriter<BoxedWrite>,
}

pub(crate) struct Transport {
    address: String,
    tls_host: String,
    tls: Option<TlsConnector>,
    control: tokio::sync::Mutex<ControlChannel>,
}

impl Transport {
    /// Dials the control connection. Fails fast if the server is not
    /// reachable.
    pub(crate) async fn connect(address: &str, options: &DriverOptions) -> DriverResult<Self> {
        let tls = build_tls_connector(options)?;
        let tls_host = tls_host_of(address);

        let (reader, writer) = dial(address, &tls_host, tls.as_ref()).await?;
        tracing::debug!("opened control connection to {}", address);

        Ok(Self {
            address: address.to_string(),
            tls_host,
            tls,
            control: tokio::sync::Mutex::new(ControlChannel {
                reader: FrameReader::new(reader),
                writer: FrameWriter::new(writer),
            }),
        })
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// One unary call on the control connection: write the request, read
    /// exactly one response. Server-side errors come back as `Err`.
    pub(crate) async fn call(
        &self,
        auth: Option<String>,
        body: ControlBody,
    ) -> DriverResult<ControlResponse> {
        let mut control = self.control.lock().await;
        control
            .writer
            .write_frame(&ControlRequest { auth, body })
            .await?;
        let response = control
            .reader
            .read_frame::<ControlResponse>()
            .await?
            .ok_or_else(|| DriverError::Transport("control connection closed".to_string()))?;
        match response {
            ControlResponse::Error { error } => Err(DriverError::from_server(error)),
            other => Ok(other),
        }
    }

    /// Dials a fresh duplex connection, attaches the bearer token, and
    /// returns the stream halves for a transaction's multiplexer.
    pub(crate) async fn open_transaction_stream(
        &self,
        auth: Option<String>,
    ) -> DriverResult<(BoxedRead, BoxedWrite)> {
        let (mut reader, mut writer) = dial(&self.address, &self.tls_host, self.tls.as_ref()).await?;

        let mut frame_writer = FrameWriter::new(&mut writer);
        frame_writer
            .write_frame(&ControlRequest {
                auth,
                body: ControlBody::StreamAttach,
            })
            .await?;

        let mut frame_reader = FrameReader::new(&mut reader);
        let ack = frame_reader
            .read_frame::<ControlResponse>()
            .await?
            .ok_or_else(|| DriverError::Transport("stream attach rejected: connection closed".to_string()))?;
        match ack {
            ControlResponse::Ok { .. } => Ok((reader, writer)),
            ControlResponse::Error { error } => Err(DriverError::from_server(error)),
            other => Err(DriverError::Protocol(format!(
                "unexpected stream attach acknowledgement: {:?}",
                other
            ))),
        }
    }

    pub(crate) async fn close(&self) {
        let mut control = self.control.lock().await;
        if let Err(e) = control.writer.shutdown().await {
            tracing::debug!("control connection shutdown: {}", e);
        }
    }
}

async fn dial(
    address: &str,
    tls_host: &str,
    tls: Option<&TlsConnector>,
) -> DriverResult<(BoxedRead, BoxedWrite)> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| DriverError::Transport(format!("Failed to connect to {}: {}", address, e)))?;
    stream
        .set_nodelay(true)
        .map_err(|e| DriverError::Transport(format!("Failed to set TCP_NODELAY: {}", e)))?;

    let (reader, mut writer): (BoxedRead, BoxedWrite) = match tls {
        Some(connector) => {
            let tls_stream = connector
                .connect(tls_host, stream)
                .await
                .map_err(|e| DriverError::Transport(format!("TLS handshake failed: {}", e)))?;
            let (read, write) = tokio::io::split(tls_stream);
            (Box::new(read), Box::new(write))
        }
        None => {
            let (read, write) = stream.into_split();
            (Box::new(read), Box::new(write))
        }
    };
    write_magic(&mut writer).await?;
    Ok((reader, writer))
}

/// The hostname certificates are verified against: the address without its
/// port, and without the brackets of an IPv6 literal.
fn tls_host_of(address: &str) -> String {
    address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address)
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

fn build_tls_connector(options: &DriverOptions) -> DriverResult<Option<TlsConnector>> {
    if !options.is_tls_enabled() {
        return Ok(None);
    }
    let mut builder = native_tls::TlsConnector::builder();
    if let Some(path) = options.tls_root_ca() {
        let pem = std::fs::read(path).map_err(|e| {
            DriverError::Config(format!("Failed to read TLS root CA {}: {}", path.display(), e))
        })?;
        let certificate = native_tls::Certificate::from_pem(&pem)
            .map_err(|e| DriverError::Config(format!("Invalid TLS root CA: {}", e)))?;
        builder.add_root_certificate(certificate);
    }
    let connector = builder
        .build()
        .map_err(|e| DriverError::Config(format!("Failed to build TLS connector: {}", e)))?;
    Ok(Some(TlsConnector::from(connector)))
}
