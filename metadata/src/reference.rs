//! Image references.
//!
//! An image reference is an opaque string identifying one frame of one
//! instance. Two shapes can be translated to instance UIDs directly:
//!
//! - WADO-RS: `wadors:{root}/studies/{study}/series/{series}/instances/{instance}[/frames/{frame}]`
//! - WADO-URI: `wadouri:{root}?requestType=WADO&studyUID={study}&seriesUID={series}&objectUID={instance}[&frame={frame}]`
//!
//! Any other reference must be registered with the store beforehand.

/// The identifiers of an instance, and optionally one of its frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceUids {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    /// frame number, starting at 1
    pub frame: Option<u32>,
}

impl InstanceUids {
    /// Create the identifiers of a whole instance.
    pub fn new(
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        InstanceUids {
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
            frame: None,
        }
    }

    /// Refer to a single frame of the instance.
    pub fn with_frame(mut self, frame: u32) -> Self {
        self.frame = Some(frame);
        self
    }
}

const WADORS_MARKER: &str = "wadors:";
const WADOURI_MARKER: &str = "wado?requestType=WADO";
const WADOURI_PREFIX: &str = "wadouri:";

/// Translate an image reference into instance UIDs.
///
/// Returns `None` if the reference has neither of the known shapes
/// or lacks one of the identifiers.
pub fn parse_reference(reference: &str) -> Option<InstanceUids> {
    if reference.contains(WADORS_MARKER) {
        parse_wadors(reference)
    } else if reference.contains(WADOURI_MARKER)
        || (reference.starts_with(WADOURI_PREFIX) && reference.contains("requestType=WADO"))
    {
        parse_wadouri(reference)
    } else {
        None
    }
}

fn parse_wadors(reference: &str) -> Option<InstanceUids> {
    let (_, path) = reference.split_once("studies/")?;
    let mut parts = path.split('/');
    let study = parts.next().filter(|s| !s.is_empty())?;
    if parts.next()? != "series" {
        return None;
    }
    let series = parts.next().filter(|s| !s.is_empty())?;
    if parts.next()? != "instances" {
        return None;
    }
    let instance = parts.next().filter(|s| !s.is_empty())?;
    let frame = match (parts.next(), parts.next()) {
        (Some("frames"), Some(frame)) => frame.parse().ok(),
        _ => None,
    };
    Some(InstanceUids {
        frame,
        ..InstanceUids::new(study, series, instance)
    })
}

fn parse_wadouri(reference: &str) -> Option<InstanceUids> {
    let (_, query) = reference.split_once('?')?;
    let (mut study, mut series, mut instance, mut frame) = (None, None, None, None);
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match &*key {
            "studyUID" => study = Some(value.into_owned()),
            "seriesUID" => series = Some(value.into_owned()),
            "objectUID" => instance = Some(value.into_owned()),
            "frame" => frame = value.parse().ok(),
            _ => {}
        }
    }
    fn nonempty(v: Option<String>) -> Option<String> {
        v.filter(|s| !s.is_empty())
    }
    Some(InstanceUids {
        frame,
        ..InstanceUids::new(nonempty(study)?, nonempty(series)?, nonempty(instance)?)
    })
}

/// Build a WADO-RS image reference.
pub fn wadors_reference(wado_root: &str, uids: &InstanceUids) -> String {
    let mut reference = format!(
        "{}{}/studies/{}/series/{}/instances/{}",
        WADORS_MARKER,
        wado_root.trim_end_matches('/'),
        uids.study_instance_uid,
        uids.series_instance_uid,
        uids.sop_instance_uid,
    );
    if let Some(frame) = uids.frame {
        reference.push_str(&format!("/frames/{frame}"));
    }
    reference
}

/// Build a WADO-URI image reference.
pub fn wadouri_reference(wado_uri_root: &str, uids: &InstanceUids) -> String {
    let mut reference = format!(
        "{}{}?requestType=WADO&studyUID={}&seriesUID={}&objectUID={}&contentType=application/dicom&transferSyntax=*",
        WADOURI_PREFIX,
        wado_uri_root,
        uids.study_instance_uid,
        uids.series_instance_uid,
        uids.sop_instance_uid,
    );
    if let Some(frame) = uids.frame {
        reference.push_str(&format!("&frame={frame}"));
    }
    reference
}
