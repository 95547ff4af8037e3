//! Minimal reader for the Prometheus text exposition format.

use std::collections::BTreeMap;

/// One sample line, e.g. `process_cpu_usage{pool="a"} 0.25`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Parsed scrape of one endpoint.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    samples: Vec<MetricSample>,
}

impl MetricSet {
    /// Parse exposition text, skipping comments, blank lines and lines that
    /// do not parse.
    pub fn parse(text: &str) -> Self {
        let samples = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(parse_line)
            .collect();
        Self { samples }
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samples.iter().any(|s| s.name == name)
    }

    /// Sum over every sample named `name`, `None` if there is none.
    pub fn sum(&self, name: &str) -> Option<f64> {
        self.values(name).reduce(|a, b| a + b)
    }

    pub fn max(&self, name: &str) -> Option<f64> {
        self.values(name).reduce(f64::max)
    }

    fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.samples
            .iter()
            .filter(move |s| s.name == name)
            .map(|s| s.value)
    }
}

fn parse_line(line: &str) -> Option<MetricSample> {
    let (name, labels, rest) = match line.find('{') {
        Some(open) => {
            let close = line[open..].rfind('}')? + open;
            (&line[..open], parse_labels(&line[open + 1..close])?, &line[close + 1..])
        }
        None => {
            let split = line.find(char::is_whitespace)?;
            (&line[..split], BTreeMap::new(), &line[split..])
        }
    };

    // An optional timestamp may follow the value.
    let value = parse_value(rest.split_whitespace().next()?)?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    Some(MetricSample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn parse_value(raw: &str) -> Option<f64> {
    match raw {
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

fn parse_labels(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start().strip_prefix('"')?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let end = loop {
            match chars.next()? {
                (i, '"') => break i,
                (_, '\\') => match chars.next()?.1 {
                    'n' => value.push('\n'),
                    other => value.push(other),
                },
                (_, c) => value.push(c),
            }
        };

        labels.insert(key, value);
        rest = rest[end + 1..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    Some(labels)
}
