use std::{collections::HashMap, fmt};

/// Secrets forwarded by the CO. Values never show up in `Debug` output, so
/// requests holding them can be recorded on tracing spans.
#[derive(Clone, Default)]
pub(crate) struct Secrets(HashMap<String, String>);

impl AsRef<HashMap<String, String>> for Secrets {
  #[inline]
  fn as_ref(&self) -> &HashMap<String, String> {
    &self.0
  }
}

impl From<HashMap<String, String>> for Secrets {
  #[inline]
  fn from(v: HashMap<String, String>) -> Self {
    Secrets(v)
  }
}

impl fmt::Debug for Secrets {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut keys = self.0.keys().collect::<Vec<_>>();
    keys.sort();

    let mut m = f.debug_map();
    for k in keys {
      m.key(k).value(&"SECRET");
    }

    m.finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn debug_output_hides_values() {
    let mut map = HashMap::new();
    map.insert("password".to_owned(), "hunter2".to_owned());
    map.insert("realm_ip".to_owned(), "10.0.0.1".to_owned());

    let debug = format!("{:?}", Secrets::from(map));
    assert_eq!(debug, r#"{"password": "SECRET", "realm_ip": "SECRET"}"#);
    assert!(!debug.contains("hunter2"));
  }
}
