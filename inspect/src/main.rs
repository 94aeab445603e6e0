//! A CLI tool for inspecting the normalized metadata of DICOM instances,
//! read from DICOM JSON or DICOM P10 files
//! or retrieved from a DICOMweb server.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use dicom_metadata::dictionary::ParseError;
use dicom_metadata::reference::wadors_reference;
use dicom_metadata::{
    BulkDataFetcher, GetOptions, InsertContext, MetadataProvider, OfflineFetcher, TagDictionary,
};
use dicom_metadata_web::{DicomWebClient, DicomWebError};
use snafu::{OptionExt, Report, ResultExt, Snafu, Whatever};
use tracing::{error, info, warn, Level};

/// Print the normalized metadata of DICOM instances
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// DICOM JSON or DICOM P10 files to load
    files: Vec<PathBuf>,

    /// Root URL of a DICOMweb service to retrieve series metadata from
    #[arg(short = 'u', long = "url", requires_all = ["study", "series"])]
    url: Option<String>,

    /// Study Instance UID of the series to retrieve
    #[arg(long = "study", requires = "url")]
    study: Option<String>,

    /// Series Instance UID of the series to retrieve
    #[arg(long = "series", requires = "url")]
    series: Option<String>,

    /// What to print:
    /// `instance`, an attribute keyword (e.g. `Rows`)
    /// or a module name (e.g. `imagePlaneModule`)
    #[arg(short = 'k', long = "kind", default_value = "instance")]
    kind: String,

    /// Image reference of the instance to print
    /// (default is to print every loaded instance)
    #[arg(short = 'r', long = "reference")]
    reference: Option<String>,

    /// Look up substitute attributes of absent ones
    /// (e.g. ImagerPixelSpacing for PixelSpacing)
    #[arg(long = "fallback")]
    fallback: bool,

    /// User name for basic authentication
    #[arg(long = "user", requires = "url")]
    user: Option<String>,

    /// Password for basic authentication
    #[arg(long = "password", requires = "user")]
    password: Option<String>,

    /// Bearer token for authentication
    #[arg(long = "token", requires = "url", conflicts_with = "user")]
    token: Option<String>,

    /// Print more information about what is loaded
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Could not read {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not parse {}", path.display()))]
    ParseFile { path: PathBuf, source: ParseError },
    #[snafu(display("Could not retrieve series metadata"))]
    Retrieve { source: DicomWebError },
    #[snafu(display("Could not insert data set"))]
    Insert { source: dicom_metadata::Error },
    #[snafu(display("No `{}` metadata for {}", kind, reference))]
    NoMetadata { kind: String, reference: String },
    #[snafu(display("Could not serialize metadata"))]
    Serialize { source: serde_json::Error },
}

type Provider = MetadataProvider<Arc<dyn BulkDataFetcher>>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let app = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if app.verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(std::io::stderr)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(app).await.unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

async fn run(app: App) -> Result<(), Error> {
    let App {
        files,
        url,
        study,
        series,
        kind,
        reference,
        fallback,
        user,
        password,
        token,
        verbose: _,
    } = app;

    let client = url.as_deref().map(|url| {
        let mut client = DicomWebClient::with_single_url(url);
        if let Some(user) = &user {
            client.set_basic_auth(user, password.as_deref().unwrap_or_default());
        }
        if let Some(token) = &token {
            client.set_bearer_token(token);
        }
        client
    });
    let fetcher: Arc<dyn BulkDataFetcher> = match &client {
        Some(client) => Arc::new(client.clone()),
        None => Arc::new(OfflineFetcher),
    };
    let provider = MetadataProvider::new(fetcher);

    let mut file_count = 0;
    for path in &files {
        for dataset in read_datasets(path)? {
            let context = InsertContext::new().with_reference(format!("dicomfile:{file_count}"));
            file_count += 1;
            insert(&provider, dataset, &context).await?;
        }
    }

    if let (Some(client), Some(study), Some(series)) = (&client, &study, &series) {
        let datasets = client
            .retrieve_series_metadata(study, series)
            .run()
            .await
            .context(RetrieveSnafu)?;
        info!("Retrieved metadata of {} instances", datasets.len());
        let context = InsertContext::new().with_wado_root(client.wado_url());
        for dataset in datasets {
            insert(&provider, dataset, &context).await?;
        }
    }

    let options = GetOptions { fallback };
    let output = match reference {
        Some(reference) => {
            let value = provider
                .get_with(&kind, &reference, options)
                .context(NoMetadataSnafu {
                    kind: &kind,
                    reference: &reference,
                })?;
            serde_json::to_value(value).context(SerializeSnafu)?
        }
        None => {
            let root = client.as_ref().map_or("local", |c| c.wado_url());
            let mut all = serde_json::Map::new();
            for uids in provider.instance_uids() {
                let reference = wadors_reference(root, &uids);
                if let Some(value) = provider.get_with(&kind, &reference, options) {
                    let value = serde_json::to_value(value).context(SerializeSnafu)?;
                    all.insert(reference, value);
                }
            }
            serde_json::Value::Object(all)
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context(SerializeSnafu)?
    );
    Ok(())
}

/// Whether the file contents look like DICOM JSON rather than DICOM P10.
fn is_json(bytes: &[u8]) -> bool {
    matches!(
        bytes.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    )
}

fn read_datasets(path: &Path) -> Result<Vec<TagDictionary>, Error> {
    let bytes = std::fs::read(path).context(ReadFileSnafu { path })?;
    if is_json(&bytes) {
        TagDictionary::list_from_json_slice(&bytes).context(ParseFileSnafu { path })
    } else {
        let dataset = TagDictionary::from_p10(&bytes).context(ParseFileSnafu { path })?;
        Ok(vec![dataset])
    }
}

async fn insert(
    provider: &Provider,
    dataset: TagDictionary,
    context: &InsertContext,
) -> Result<(), Error> {
    match provider.insert(dataset, context).await {
        Ok(_) => Ok(()),
        // indexed without the affected attributes
        Err(
            e @ (dicom_metadata::Error::PaletteColor { .. }
            | dicom_metadata::Error::OverlayData { .. }),
        ) => {
            warn!("{}", Report::from_error(e));
            Ok(())
        }
        Err(e) => Err(e).context(InsertSnafu),
    }
}
