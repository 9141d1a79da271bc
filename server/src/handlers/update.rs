//! Best-effort mirroring of patches to SPARQL Update endpoints.
//!
//! Each patch is rendered as SPARQL Update text and POSTed to every
//! endpoint. Delivery failures are logged and never reach the caller.

use std::time::Duration;

use crate::handlers::PatchHandler;
use crate::patch::{Patch, PatchError, PatchSink, Quad};
use crate::types::Node;
use crate::types::node::escape_iri;

pub const SPARQL_UPDATE_CONTENT_TYPE: &str = "application/sparql-update";
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers rendered update requests.
pub trait UpdateTransport: Send + Sync {
    /// POST `body` to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a description of the delivery failure.
    fn post(&self, endpoint: &str, body: &str) -> Result<(), String>;
}

/// Blocking HTTP transport.
///
/// Must not be called from inside an async runtime worker; wrap calls in
/// `spawn_blocking` there.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns the client build error, e.g. if TLS cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl UpdateTransport for HttpTransport {
    fn post(&self, endpoint: &str, body: &str) -> Result<(), String> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, SPARQL_UPDATE_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {status}"))
        }
    }
}

/// Render a patch as SPARQL Update text.
///
/// # Errors
///
/// Never fails in practice; the signature follows `Patch::play`.
pub fn render_update(patch: &Patch) -> Result<String, PatchError> {
    let mut writer = UpdateWriter::default();
    patch.play(&mut writer)?;
    Ok(writer.out)
}

#[derive(Debug, Default)]
struct UpdateWriter {
    out: String,
}

impl UpdateWriter {
    fn node(&mut self, node: &Node) {
        match node {
            Node::Blank(label) => {
                self.out.push_str("<_:");
                escape_iri(label, &mut self.out);
                self.out.push('>');
            }
            _ => self.out.push_str(&node.to_string()),
        }
    }

    fn data(&mut self, keyword: &str, quad: &Quad) {
        self.out.push_str(keyword);
        self.out.push_str(" { ");
        if let Some(g) = &quad.graph {
            self.out.push_str("GRAPH ");
            self.node(g);
            self.out.push_str(" { ");
        }
        self.node(&quad.subject);
        self.out.push(' ');
        self.node(&quad.predicate);
        self.out.push(' ');
        self.node(&quad.object);
        self.out.push(' ');
        if quad.graph.is_some() {
            self.out.push_str("} ");
        }
        self.out.push_str("} ;\n");
    }

    fn iri(&mut self, uri: &str) {
        self.out.push('<');
        escape_iri(uri, &mut self.out);
        self.out.push('>');
    }

    fn comment(&mut self, text: &str) {
        self.out.push_str("# ");
        self.out.push_str(text);
        self.out.push('\n');
    }
}

impl PatchSink for UpdateWriter {
    fn header(&mut self, field: &str, value: &Node) -> Result<(), PatchError> {
        self.out.push_str("# ");
        self.out.push_str(field);
        self.out.push(' ');
        self.node(value);
        self.out.push('\n');
        Ok(())
    }

    fn add(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.data("INSERT DATA", quad);
        Ok(())
    }

    fn delete(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.data("DELETE DATA", quad);
        Ok(())
    }

    fn add_prefix(
        &mut self,
        graph: Option<&Node>,
        prefix: &str,
        uri: &str,
    ) -> Result<(), PatchError> {
        self.out.push_str("# AddPrefix ");
        if let Some(g) = graph {
            self.node(g);
            self.out.push(' ');
        }
        self.out.push_str(prefix);
        self.out.push(' ');
        self.iri(uri);
        self.out.push_str("\nPREFIX ");
        self.out.push_str(prefix);
        self.out.push_str(": ");
        self.iri(uri);
        self.out.push('\n');
        Ok(())
    }

    fn delete_prefix(&mut self, graph: Option<&Node>, prefix: &str) -> Result<(), PatchError> {
        self.out.push_str("# DelPrefix ");
        if let Some(g) = graph {
            self.node(g);
            self.out.push(' ');
        }
        self.out.push_str(prefix);
        self.out.push('\n');
        Ok(())
    }

    fn set_base(&mut self, uri: &str) -> Result<(), PatchError> {
        self.out.push_str("BASE ");
        self.iri(uri);
        self.out.push('\n');
        Ok(())
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        self.comment("Begin");
        Ok(())
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        self.comment("Commit");
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        self.comment("Abort");
        Ok(())
    }

    fn segment(&mut self) -> Result<(), PatchError> {
        self.comment("Segment");
        Ok(())
    }
}

/// Forwards patches as SPARQL Update requests.
pub struct SparqlUpdateForwarder {
    endpoints: Vec<String>,
    transport: Box<dyn UpdateTransport>,
}

impl SparqlUpdateForwarder {
    pub fn new(endpoints: Vec<String>, transport: Box<dyn UpdateTransport>) -> Self {
        Self {
            endpoints,
            transport,
        }
    }

    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

impl PatchHandler for SparqlUpdateForwarder {
    fn handle(&self, patch: &Patch) -> Result<(), PatchError> {
        let body = match render_update(patch) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("failed to render SPARQL update: {e}");
                return Ok(());
            }
        };
        for endpoint in &self.endpoints {
            if let Err(e) = self.transport.post(endpoint, &body) {
                tracing::warn!("SPARQL update to {endpoint} failed: {e}");
            }
        }
        Ok(())
    }
}
