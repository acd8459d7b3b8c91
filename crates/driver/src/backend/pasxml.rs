use super::VolumeRecord;
use crate::errors::BackendError;
use once_cell::sync::OnceCell;
use regex::Regex;

fn volume_pattern() -> Result<&'static Regex, regex::Error> {
  static PATTERN: OnceCell<Regex> = OnceCell::new();
  PATTERN.get_or_try_init(|| Regex::new(r"(?s)<volume\b([^>]*)>(.*?)</volume>"))
}

fn element_pattern() -> Result<&'static Regex, regex::Error> {
  static PATTERN: OnceCell<Regex> = OnceCell::new();
  PATTERN.get_or_try_init(|| {
    Regex::new(r"<([A-Za-z][A-Za-z0-9]*)\b[^>]*>([^<]*)</([A-Za-z][A-Za-z0-9]*)>")
  })
}

fn id_pattern() -> Result<&'static Regex, regex::Error> {
  static PATTERN: OnceCell<Regex> = OnceCell::new();
  PATTERN.get_or_try_init(|| Regex::new(r#"\bid="([^"]*)""#))
}

fn pattern_error(e: regex::Error) -> BackendError {
  BackendError::Internal(format!("pasxml pattern: {}", e))
}

fn unescape(value: &str) -> String {
  value
    .trim()
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&apos;", "'")
    .replace("&amp;", "&")
}

fn text_field<'a>(record: &'a mut VolumeRecord, tag: &str) -> Option<&'a mut String> {
  let field = match tag {
    "name" => &mut record.name,
    "state" => &mut record.state,
    "bladesetName" => &mut record.bladeset,
    "recoveryPriority" => &mut record.recovery_priority,
    "efsa" => &mut record.efsa,
    "volservice" => &mut record.volservice,
    "raid" => &mut record.layout,
    "maxWidth" => &mut record.max_width,
    "stripeUnit" => &mut record.stripe_unit,
    "rgWidth" => &mut record.rg_width,
    "rgDepth" => &mut record.rg_depth,
    "user" => &mut record.user,
    "group" => &mut record.group,
    "uperm" => &mut record.uperm,
    "gperm" => &mut record.gperm,
    "operm" => &mut record.operm,
    "description" => &mut record.description,
    "encryption" => &mut record.encryption,
    _ => return None,
  };

  Some(field)
}

fn parse_quota(tag: &str, value: &str) -> Result<f64, BackendError> {
  if value.is_empty() {
    return Ok(0.0);
  }

  value
    .parse()
    .map_err(|_| BackendError::Internal(format!("invalid {} '{}'", tag, value)))
}

fn parse_volume(attributes: &str, body: &str) -> Result<VolumeRecord, BackendError> {
  let mut record = VolumeRecord::default();

  if let Some(id) = id_pattern()
    .map_err(pattern_error)?
    .captures(attributes)
    .and_then(|c| c.get(1))
  {
    record.id = id.as_str().to_owned();
  }

  for element in element_pattern().map_err(pattern_error)?.captures_iter(body) {
    let (tag, close) = (&element[1], &element[3]);
    if tag != close {
      continue;
    }

    let value = unescape(&element[2]);
    match tag {
      "softQuotaGB" => record.soft_quota_gb = parse_quota(tag, &value)?,
      "hardQuotaGB" => record.hard_quota_gb = parse_quota(tag, &value)?,
      _ => {
        // nested elements may reuse a tag, the first one belongs to the volume
        if let Some(field) = text_field(&mut record, tag) {
          if field.is_empty() {
            *field = value;
          }
        }
      }
    }
  }

  record.name = record.name.trim_start_matches('/').to_owned();
  if record.name.is_empty() {
    return Err(BackendError::Internal(
      "pasxml volume without a name".into(),
    ));
  }

  Ok(record)
}

/// Parses the `<volume>` elements of a realm pasxml document.
pub fn parse_volumes(document: &str) -> Result<Vec<VolumeRecord>, BackendError> {
  volume_pattern()
    .map_err(pattern_error)?
    .captures_iter(document)
    .map(|c| parse_volume(&c[1], &c[2]))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<pasxml version="6.0.0">
  <system>
    <name>realm1</name>
  </system>
  <volumes>
    <volume id="3">
      <name>/home</name>
      <bladesetName id="1">Set 1</bladesetName>
      <state>Online</state>
      <raid>raid6+</raid>
      <softQuotaGB>0.00</softQuotaGB>
      <hardQuotaGB>0.00</hardQuotaGB>
    </volume>
    <volume id="7">
      <name>/vol1</name>
      <bladesetName id="1">Set 1</bladesetName>
      <state>Online</state>
      <raid>raid10+</raid>
      <volservice>0x0400000000000004(FM)</volservice>
      <recoveryPriority>1</recoveryPriority>
      <efsa>retry</efsa>
      <softQuotaGB>10.00</softQuotaGB>
      <hardQuotaGB>12.50</hardQuotaGB>
      <encryption>on</encryption>
      <user>1000</user>
      <description>scratch &amp; logs</description>
    </volume>
  </volumes>
</pasxml>
"#;

  #[test]
  fn parses_volume_records() {
    let volumes = parse_volumes(DOCUMENT).unwrap();
    assert_eq!(volumes.len(), 2);

    let vol1 = &volumes[1];
    assert_eq!(vol1.name, "vol1");
    assert_eq!(vol1.id, "7");
    assert_eq!(vol1.bladeset, "Set 1");
    assert_eq!(vol1.layout, "raid10+");
    assert_eq!(vol1.volservice, "0x0400000000000004(FM)");
    assert_eq!(vol1.encryption(), "on");
    assert_eq!(vol1.user, "1000");
    assert_eq!(vol1.description, "scratch & logs");
    assert!((vol1.soft_quota_gb - 10.0).abs() < f64::EPSILON);
    assert!((vol1.hard_quota_gb - 12.5).abs() < f64::EPSILON);
  }

  #[test]
  fn leading_separators_are_stripped() {
    let volumes = parse_volumes(DOCUMENT).unwrap();
    assert_eq!(volumes[0].name, "home");
    assert_eq!(volumes[0].encryption(), "off");
  }

  #[test]
  fn system_name_is_not_a_volume() {
    let volumes = parse_volumes(DOCUMENT).unwrap();
    assert!(volumes.iter().all(|v| v.name != "realm1"));
  }

  #[test]
  fn empty_list() {
    assert!(parse_volumes("<volumes>\n</volumes>").unwrap().is_empty());
  }

  #[test]
  fn bad_quota_is_an_error() {
    let document = "<volume><name>/vol1</name><softQuotaGB>lots</softQuotaGB></volume>";
    assert!(matches!(
      parse_volumes(document),
      Err(BackendError::Internal(_))
    ));
  }
}
