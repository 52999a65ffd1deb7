use anyhow::Result;
use mockito::Matcher;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use docent::ingestion::{OaiClient, OaiPages};
use docent::processing::{
    harvest_to_csv, HarvestJob, NoProgress, PUBLIC_DOMAIN_MARK,
};
use docent::publish::{load_artifact, DatasetPublisher, PublishReceipt};
use docent::storage::CsvSink;

const HEADER: &str = "original_id,image_url,title,description,artist_uri,artist_name";
const IN_COPYRIGHT: &str = "http://rightsstatements.org/vocab/InC/1.0/";

// Helper to build one EDM record
fn record(id: &str, title: &str, rights: &str) -> String {
    format!(
        r#"<record>
      <header><identifier>https://id.rijksmuseum.nl/{id}</identifier></header>
      <metadata>
        <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
                 xmlns:dc="http://purl.org/dc/elements/1.1/"
                 xmlns:edm="http://www.europeana.eu/schemas/edm/"
                 xmlns:skos="http://www.w3.org/2004/02/skos/core#">
          <edm:ProvidedCHO>
            <dc:title>{title}</dc:title>
            <dc:description>Description of {title}</dc:description>
            <dc:creator rdf:resource="https://id.rijksmuseum.nl/artist/{id}"/>
          </edm:ProvidedCHO>
          <edm:object><edm:WebResource rdf:about="https://iiif.micr.io/{id}/full/max/0/default.jpg"/></edm:object>
          <edm:rights rdf:resource="{rights}"/>
          <rdf:Description rdf:about="https://id.rijksmuseum.nl/artist/{id}">
            <skos:prefLabel>Artist {id}</skos:prefLabel>
          </rdf:Description>
        </rdf:RDF>
      </metadata>
    </record>"#
    )
}

// Helper to wrap records into a ListRecords page
fn page(records: &[String], token: Option<&str>, total: u64) -> String {
    let token = match token {
        Some(t) => format!(r#"<resumptionToken completeListSize="{total}">{t}</resumptionToken>"#),
        None => format!(r#"<resumptionToken completeListSize="{total}"/>"#),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <ListRecords>
    {}
    {}
  </ListRecords>
</OAI-PMH>"#,
        records.join("\n"),
        token
    )
}

fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).expect("open csv");
    reader.records().map(|r| r.expect("row")).collect()
}

/// Publisher double that only remembers what it was asked to publish.
#[derive(Default)]
struct RecordingPublisher {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait::async_trait]
impl DatasetPublisher for RecordingPublisher {
    async fn publish(&self, artifact: &Path, repo_id: &str) -> Result<PublishReceipt> {
        self.calls
            .lock()
            .unwrap()
            .push((artifact.to_path_buf(), repo_id.to_string()));
        Ok(PublishReceipt {
            repo_id: repo_id.to_string(),
            path_in_repo: "data/train.csv".to_string(),
            rows: read_rows(artifact).len() as u64,
            commit_url: None,
            via_lfs: false,
        })
    }
}

#[tokio::test]
async fn test_chained_pages_issue_exactly_n_requests() {
    let mut server = mockito::Server::new_async().await;

    let first = server
        .mock("GET", "/oai")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("verb".into(), "ListRecords".into()),
            Matcher::UrlEncoded("metadataPrefix".into(), "edm".into()),
        ]))
        .with_status(200)
        .with_body(page(
            &[
                record("1", "One", PUBLIC_DOMAIN_MARK),
                record("2", "Two", IN_COPYRIGHT),
            ],
            Some("t1"),
            5,
        ))
        .expect(1)
        .create_async()
        .await;

    let second = server
        .mock("GET", "/oai")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("verb".into(), "ListRecords".into()),
            Matcher::UrlEncoded("resumptionToken".into(), "t1".into()),
        ]))
        .with_status(200)
        .with_body(page(
            &[
                record("3", "Three", PUBLIC_DOMAIN_MARK),
                record("4", "Four", PUBLIC_DOMAIN_MARK),
            ],
            Some("t2"),
            5,
        ))
        .expect(1)
        .create_async()
        .await;

    let third = server
        .mock("GET", "/oai")
        .match_query(Matcher::UrlEncoded("resumptionToken".into(), "t2".into()))
        .with_status(200)
        .with_body(page(&[record("5", "Five", IN_COPYRIGHT)], None, 5))
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out/rijks.csv");

    let client = OaiClient::new(format!("{}/oai", server.url()), 10).unwrap();
    let mut pages = OaiPages::new(client, "edm");
    let mut sink = CsvSink::create(&output).unwrap();

    let report = harvest_to_csv(&mut pages, &mut sink, PUBLIC_DOMAIN_MARK, &NoProgress)
        .await
        .expect("harvest");

    first.assert_async().await;
    second.assert_async().await;
    third.assert_async().await;

    assert_eq!(report.pages, 3);
    assert_eq!(pages.requests(), 3);
    assert!(pages.is_exhausted());
    assert_eq!(report.records_seen, 5);
    assert_eq!(report.declared_total, Some(5));

    // data rows = sum over pages of (records - filtered)
    assert_eq!(report.records_kept, 3);
    assert_eq!(report.records_dropped(), 2);

    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content.matches(HEADER).count(), 1);
    assert!(content.starts_with(HEADER));

    let rows = read_rows(&output);
    let ids: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(
        ids,
        vec![
            "https://id.rijksmuseum.nl/1",
            "https://id.rijksmuseum.nl/3",
            "https://id.rijksmuseum.nl/4",
        ]
    );
    assert_eq!(&rows[1][5], "Artist 3");
}

#[tokio::test]
async fn test_end_to_end_single_page_publishes_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/oai")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(page(
            &[
                record("10", "Kept A", PUBLIC_DOMAIN_MARK),
                record("11", "Dropped", IN_COPYRIGHT),
                record("12", "Kept B", PUBLIC_DOMAIN_MARK),
            ],
            None,
            3,
        ))
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dataset.csv");
    let job = HarvestJob::new(format!("{}/oai", server.url()), &output);
    let publisher = RecordingPublisher::default();

    let (report, receipt) = job
        .run_and_publish(&publisher, "someone/rijksmuseum-oai", &NoProgress)
        .await
        .expect("harvest and publish");

    mock.assert_async().await;

    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content.lines().count(), 3);
    assert_eq!(report.records_kept, 2);
    assert_eq!(receipt.rows, 2);

    let calls = publisher.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, output);
    assert_eq!(calls[0].1, "someone/rijksmuseum-oai");
}

#[tokio::test]
async fn test_transport_error_aborts_without_publishing() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/oai")
        .match_query(Matcher::UrlEncoded("metadataPrefix".into(), "edm".into()))
        .with_status(200)
        .with_body(page(&[record("1", "One", PUBLIC_DOMAIN_MARK)], Some("t1"), 2))
        .create_async()
        .await;
    let failing = server
        .mock("GET", "/oai")
        .match_query(Matcher::UrlEncoded("resumptionToken".into(), "t1".into()))
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dataset.csv");
    let job = HarvestJob::new(format!("{}/oai", server.url()), &output);
    let publisher = RecordingPublisher::default();

    let err = job
        .run_and_publish(&publisher, "someone/rijksmuseum-oai", &NoProgress)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("503"));

    // no retry
    failing.assert_async().await;
    assert!(publisher.calls.lock().unwrap().is_empty());

    // the first page is already on disk
    assert_eq!(read_rows(&output).len(), 1);
}

#[tokio::test]
async fn test_first_page_failure_leaves_header_only_artifact() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/oai")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dataset.csv");
    let result = HarvestJob::new(format!("{}/oai", server.url()), &output)
        .run(&NoProgress)
        .await;

    assert!(result.is_err());
    failing.assert_async().await;

    assert_eq!(std::fs::read_to_string(&output).unwrap().trim_end(), HEADER);
    let artifact = load_artifact(&output).expect("valid artifact");
    assert_eq!(artifact.rows, 0);
}

#[tokio::test]
async fn test_no_records_match_yields_header_only() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/oai")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
                 <error code="noRecordsMatch">No records</error>
               </OAI-PMH>"#,
        )
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("empty.csv");
    let report = HarvestJob::new(format!("{}/oai", server.url()), &output)
        .run(&NoProgress)
        .await
        .expect("noRecordsMatch is not fatal");

    assert_eq!(report.records_seen, 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap().trim_end(), HEADER);
}

#[tokio::test]
async fn test_protocol_error_is_fatal() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/oai")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
                 <error code="cannotDisseminateFormat">Unknown prefix</error>
               </OAI-PMH>"#,
        )
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = HarvestJob::new(format!("{}/oai", server.url()), dir.path().join("x.csv"))
        .run(&NoProgress)
        .await;
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("cannotDisseminateFormat"));
}
