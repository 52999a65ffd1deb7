//! OAI-PMH page parsing and EDM record extraction.
//!
//! Pages are parsed into a small namespace-resolved element tree, then each
//! `oai:record` is flattened into a [`RawHarvestRecord`] with path lookups that
//! default to `None` instead of failing on sparse metadata.

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use serde::Serialize;
use tracing::{debug, warn};

/// Namespace URIs used by OAI-PMH + EDM responses.
pub mod ns {
    pub const OAI: &str = "http://www.openarchives.org/OAI/2.0/";
    pub const DC: &str = "http://purl.org/dc/elements/1.1/";
    pub const EDM: &str = "http://www.europeana.eu/schemas/edm/";
    pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    pub const SKOS: &str = "http://www.w3.org/2004/02/skos/core#";
}

/// One harvested record, flattened. Only lives for the page it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawHarvestRecord {
    pub original_id: Option<String>,
    pub image_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub artist_uri: Option<String>,
    pub artist_name: Option<String>,
    /// Rights statement URIs; drives the license filter, never persisted.
    #[serde(skip)]
    pub rights: Vec<String>,
}

impl RawHarvestRecord {
    /// CSV column order, matching the serialized field order.
    pub const COLUMNS: [&'static str; 6] = [
        "original_id",
        "image_url",
        "title",
        "description",
        "artist_uri",
        "artist_name",
    ];
}

/// Protocol-level error reported inside an OAI-PMH response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaiError {
    pub code: String,
    pub message: String,
}

/// Everything a single ListRecords response carries.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub records: Vec<RawHarvestRecord>,
    /// Continuation token; `None` when absent or empty (last page).
    pub resumption_token: Option<String>,
    /// `completeListSize` declared on the resumption token, if any.
    pub complete_list_size: Option<u64>,
    pub error: Option<OaiError>,
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct XmlAttribute {
    namespace: Option<String>,
    name: String,
    value: String,
}

/// Namespace-resolved XML element with its direct text content.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub namespace: Option<String>,
    pub name: String,
    attributes: Vec<XmlAttribute>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Attribute value by namespace + local name.
    pub fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }

    /// Trimmed direct text, `None` when empty.
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    /// Direct children matching namespace + local name.
    pub fn children<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, name))
    }

    /// All descendants (not self) matching namespace + local name, in document order.
    pub fn descendants(&self, namespace: &str, name: &str) -> Vec<&XmlElement> {
        let mut found = Vec::new();
        let mut stack: Vec<&XmlElement> = self.children.iter().rev().collect();
        while let Some(el) = stack.pop() {
            if el.is(namespace, name) {
                found.push(el);
            }
            stack.extend(el.children.iter().rev());
        }
        found
    }

    /// First descendant in document order.
    pub fn descendant(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        self.descendants(namespace, name).into_iter().next()
    }
}

fn namespace_uri(ns: &ResolveResult) -> Option<String> {
    match ns {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

fn element<R>(reader: &NsReader<R>, namespace: Option<String>, start: &BytesStart) -> Result<XmlElement> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.context("malformed XML attribute")?;
        let (attr_ns, local) = reader.resolve_attribute(attr.key);
        let attr_ns = namespace_uri(&attr_ns);
        attributes.push(XmlAttribute {
            namespace: attr_ns,
            name: String::from_utf8_lossy(local.as_ref()).into_owned(),
            value: attr
                .unescape_value()
                .context("malformed XML attribute value")?
                .into_owned(),
        });
    }

    Ok(XmlElement {
        namespace,
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}

/// Parse a whole XML document into its root element.
pub fn parse_document(xml: &[u8]) -> Result<XmlElement> {
    let mut reader = NsReader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    loop {
        let (ns, event) = reader
            .read_resolved_event_into(&mut buf)
            .context("malformed XML")?;
        let namespace = namespace_uri(&ns);

        match event {
            Event::Start(start) => {
                let el = element(&reader, namespace, &start)?;
                stack.push(el);
            }
            Event::Empty(start) => {
                let el = element(&reader, namespace, &start)?;
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                let el = stack.pop().context("unbalanced XML end tag")?;
                attach(&mut stack, &mut root, el);
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&text.unescape().context("malformed XML text")?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        anyhow::bail!("XML document ended with {} unclosed element(s)", stack.len());
    }
    root.context("XML document has no root element")
}

// ---------------------------------------------------------------------------
// Record extraction
// ---------------------------------------------------------------------------

/// First non-empty text among all matching descendants.
fn first_text(record: &XmlElement, namespace: &str, name: &str) -> Option<String> {
    record
        .descendants(namespace, name)
        .into_iter()
        .find_map(XmlElement::text)
        .map(str::to_string)
}

fn image_url(record: &XmlElement) -> Option<String> {
    let objects = record.descendants(ns::EDM, "object");

    let web_resource = objects
        .iter()
        .flat_map(|o| o.children(ns::EDM, "WebResource"))
        .find_map(|r| r.attribute(Some(ns::RDF), "about"));

    web_resource
        .or_else(|| objects.iter().find_map(|o| o.attribute(Some(ns::RDF), "resource")))
        .map(str::to_string)
}

/// Resolve the creator URI against an `rdf:Description` in the same record.
fn artist_name(record: &XmlElement, artist_uri: &str) -> Option<String> {
    let description = record
        .descendants(ns::RDF, "Description")
        .into_iter()
        .find(|d| d.attribute(Some(ns::RDF), "about") == Some(artist_uri))?;

    description
        .children(ns::SKOS, "prefLabel")
        .find_map(XmlElement::text)
        .map(str::to_string)
}

/// Flatten one `oai:record` element. Never fails; absent fields become `None`.
pub fn extract_record(record: &XmlElement) -> RawHarvestRecord {
    let artist_uri = record
        .descendants(ns::DC, "creator")
        .into_iter()
        .find_map(|c| c.attribute(Some(ns::RDF), "resource"))
        .map(str::to_string);

    let artist_name = artist_uri.as_deref().and_then(|uri| artist_name(record, uri));

    let rights = record
        .descendants(ns::EDM, "rights")
        .into_iter()
        .filter_map(|r| r.attribute(Some(ns::RDF), "resource"))
        .map(str::to_string)
        .collect();

    RawHarvestRecord {
        original_id: first_text(record, ns::OAI, "identifier"),
        image_url: image_url(record),
        title: first_text(record, ns::DC, "title"),
        description: first_text(record, ns::DC, "description"),
        artist_uri,
        artist_name,
        rights,
    }
}

/// Parse a ListRecords response body into records, token and declared size.
pub fn parse_page(xml: &[u8]) -> Result<ParsedPage> {
    let root = parse_document(xml).context("failed to parse OAI-PMH response")?;

    let error = root.children(ns::OAI, "error").next().map(|e| OaiError {
        code: e.attribute(None, "code").unwrap_or("unknown").to_string(),
        message: e.text().unwrap_or_default().to_string(),
    });

    let records: Vec<RawHarvestRecord> = root
        .descendants(ns::OAI, "record")
        .into_iter()
        .map(extract_record)
        .collect();

    let token_el = root.descendant(ns::OAI, "resumptionToken");
    let resumption_token = token_el.and_then(XmlElement::text).map(str::to_string);
    let complete_list_size = token_el
        .and_then(|t| t.attribute(None, "completeListSize"))
        .and_then(|size| match size.trim().parse::<u64>() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("ignoring unparsable completeListSize '{}': {}", size, e);
                None
            }
        });

    debug!(
        records = records.len(),
        has_token = resumption_token.is_some(),
        "parsed OAI-PMH page"
    );

    Ok(ParsedPage {
        records,
        resumption_token,
        complete_list_size,
        error,
    })
}
