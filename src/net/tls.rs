//! TLS settings and the TLS byte source
//!
//! With the `tls` feature, [`ServerTls`] and [`ClientTls`] wrap rustls
//! configurations loaded from PEM files and [`TlsSession`] drives a rustls
//! connection over a non-blocking socket. Without it both settings types are
//! uninhabited, so TLS arguments can only ever be `None`.

#[cfg(feature = "tls")]
pub use enabled::{ClientTls, ServerTls, TlsSession};

#[cfg(not(feature = "tls"))]
pub use disabled::{ClientTls, ServerTls};

#[cfg(feature = "tls")]
mod enabled {
    use std::{
        fmt,
        fs::File,
        io::{self, BufReader, Read, Write},
        net::IpAddr,
        path::Path,
        sync::Arc,
    };

    use mio::net::TcpStream;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};

    use crate::error::{NetError, Result};

    /// Load certificates from a PEM file
    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
        let file = File::open(path).map_err(|e| NetError::from_io(e, &path.display().to_string()))?;
        let mut reader = BufReader::new(file);
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .filter_map(|cert| cert.ok())
            .collect();
        if certs.is_empty() {
            return Err(NetError::tls(format!("no certificates found in {}", path.display())));
        }
        Ok(certs)
    }

    /// Load the first private key from a PEM file
    fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
        let file = File::open(path).map_err(|e| NetError::from_io(e, &path.display().to_string()))?;
        let mut reader = BufReader::new(file);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| NetError::from_io(e, &path.display().to_string()))?
            .ok_or_else(|| NetError::tls(format!("no private key found in {}", path.display())))
    }

    /// Server-side TLS settings shared by every connection a listener accepts
    #[derive(Clone)]
    pub struct ServerTls {
        config: Arc<rustls::ServerConfig>,
    }

    impl ServerTls {
        /// Build settings from a PEM certificate chain and private key
        pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
            let certs = load_certs(cert_path.as_ref())?;
            let key = load_private_key(key_path.as_ref())?;

            let config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| NetError::tls(e.to_string()))?;

            log::debug!("server TLS configured from {}", cert_path.as_ref().display());
            Ok(Self::from_config(Arc::new(config)))
        }

        /// Use a prepared rustls configuration
        pub fn from_config(config: Arc<rustls::ServerConfig>) -> Self {
            Self { config }
        }

        /// Start the server side of a session on an accepted socket
        pub fn session(&self, socket: TcpStream) -> Result<TlsSession> {
            let conn = rustls::ServerConnection::new(Arc::clone(&self.config))
                .map_err(|e| NetError::tls(e.to_string()))?;
            Ok(TlsSession::new(conn.into(), socket))
        }
    }

    impl fmt::Debug for ServerTls {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ServerTls").finish_non_exhaustive()
        }
    }

    /// Client-side TLS settings for secure `connect` calls
    #[derive(Clone)]
    pub struct ClientTls {
        config: Arc<rustls::ClientConfig>,
        server_name: Option<ServerName<'static>>,
    }

    impl ClientTls {
        /// Trust the certificates found in the given PEM files
        pub fn from_root_pem_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
            let mut roots = rustls::RootCertStore::empty();
            for path in paths {
                for cert in load_certs(path.as_ref())? {
                    roots.add(cert).map_err(|e| NetError::tls(e.to_string()))?;
                }
            }

            let config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(Self::from_config(Arc::new(config)))
        }

        /// Use a prepared rustls configuration
        pub fn from_config(config: Arc<rustls::ClientConfig>) -> Self {
            Self {
                config,
                server_name: None,
            }
        }

        /// Verify peers against `name` instead of their IP address
        pub fn with_server_name(mut self, name: impl Into<String>) -> Result<Self> {
            let name = ServerName::try_from(name.into()).map_err(|e| NetError::tls(e.to_string()))?;
            self.server_name = Some(name);
            Ok(self)
        }

        /// Start the client side of a session on a socket connected to `ip`
        pub fn session(&self, socket: TcpStream, ip: IpAddr) -> Result<TlsSession> {
            let name = self
                .server_name
                .clone()
                .unwrap_or_else(|| ServerName::IpAddress(ip.into()));
            let conn = rustls::ClientConnection::new(Arc::clone(&self.config), name)
                .map_err(|e| NetError::tls(e.to_string()))?;
            Ok(TlsSession::new(conn.into(), socket))
        }
    }

    impl fmt::Debug for ClientTls {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ClientTls")
                .field("server_name", &self.server_name)
                .finish_non_exhaustive()
        }
    }

    /// A rustls connection bound to a non-blocking socket
    ///
    /// Reads pull TLS records from the socket until plaintext is available;
    /// writes buffer plaintext in rustls and push as many records as the
    /// socket takes. Records left over are sent by [`TlsSession::flush_tls`].
    pub struct TlsSession {
        conn: rustls::Connection,
        socket: TcpStream,
        /// The socket reported end of stream
        eof: bool,
    }

    impl TlsSession {
        fn new(conn: rustls::Connection, socket: TcpStream) -> Self {
            Self {
                conn,
                socket,
                eof: false,
            }
        }

        /// Underlying socket
        pub fn socket(&self) -> &TcpStream {
            &self.socket
        }

        /// Underlying socket, for registration with a poll
        pub fn socket_mut(&mut self) -> &mut TcpStream {
            &mut self.socket
        }

        /// Check if the handshake is still running
        pub fn is_handshaking(&self) -> bool {
            self.conn.is_handshaking()
        }

        /// Check if encrypted records are waiting for the socket
        pub fn wants_write(&self) -> bool {
            self.conn.wants_write()
        }

        /// Write buffered records until the socket would block
        pub fn flush_tls(&mut self) -> io::Result<()> {
            while self.conn.wants_write() {
                match self.conn.write_tls(&mut self.socket) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }

        /// Queue close_notify and push it out if the socket allows
        pub fn close(&mut self) {
            self.conn.send_close_notify();
            if let Err(e) = self.flush_tls() {
                log::trace!("close_notify not delivered: {}", e);
            }
        }
    }

    impl Read for TlsSession {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                match self.conn.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }

                if self.eof {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }

                match self.conn.read_tls(&mut self.socket) {
                    Ok(0) => self.eof = true,
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }

                self.conn
                    .process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                // Handshake replies and alerts
                self.flush_tls()?;
            }
        }
    }

    impl Write for TlsSession {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let written = self.conn.writer().write(buf)?;
            self.flush_tls()?;
            if written == 0 && !buf.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            Ok(written)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flush_tls()
        }
    }

    impl fmt::Debug for TlsSession {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TlsSession")
                .field("handshaking", &self.conn.is_handshaking())
                .field("eof", &self.eof)
                .finish()
        }
    }
}

#[cfg(not(feature = "tls"))]
mod disabled {
    /// Server TLS settings (built without the `tls` feature)
    #[derive(Debug, Clone)]
    pub enum ServerTls {}

    /// Client TLS settings (built without the `tls` feature)
    #[derive(Debug, Clone)]
    pub enum ClientTls {}
}
