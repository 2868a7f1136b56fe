//! Locale/country derived cultural defaults and location-reference
//! resolution under consent (spec.md §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementSystem {
    Metric,
    Imperial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    #[serde(rename = "MDY")]
    Mdy,
    #[serde(rename = "DMY")]
    Dmy,
    #[serde(rename = "YMD")]
    Ymd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "24h")]
    Hour24,
}

/// Advisory cultural defaults. Never asserted as fact by the composer --
/// purely a seed for low-confidence elements.
#[derive(Debug, Clone, Serialize)]
pub struct CulturalDefaults {
    pub region_label: String,
    pub formality: &'static str,
    pub directness: &'static str,
    pub context_dependency: &'static str,
    pub punctuality: &'static str,
    pub weekend_days: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct ParsedLocale {
    pub language: String,
    pub script: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpatialContext {
    pub country: Option<String>,
    pub currency: Option<&'static str>,
    pub measurement_system: MeasurementSystem,
    pub date_format: DateFormat,
    pub time_format: TimeFormat,
    pub default_timezone_guess: Option<&'static str>,
    pub cultural: Option<CulturalDefaults>,
}

/// Parses a BCP-47 locale tag into `(language, script?, country?)` by
/// trying sub-tags longest-first (a 4-letter tag is a script, a 2-3 letter
/// trailing tag is a country/region).
pub fn parse_locale(locale: &str) -> ParsedLocale {
    let mut parts: Vec<&str> = locale.split(['-', '_']).collect();
    if parts.is_empty() {
        return ParsedLocale { language: "en".to_string(), script: None, country: None };
    }
    let language = parts.remove(0).to_ascii_lowercase();

    parts.sort_by_key(|p| std::cmp::Reverse(p.len()));

    let mut script = None;
    let mut country = None;
    for part in parts {
        if part.len() == 4 && script.is_none() {
            script = Some(capitalize_script(part));
        } else if (part.len() == 2 || part.len() == 3) && country.is_none() {
            country = Some(part.to_ascii_uppercase());
        }
    }

    ParsedLocale { language, script, country }
}

fn capitalize_script(script: &str) -> String {
    let mut chars = script.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

const IMPERIAL_COUNTRIES: &[&str] = &["US", "LR", "MM"];

fn currency_for_country(country: &str) -> Option<&'static str> {
    match country {
        "US" => Some("USD"),
        "GB" => Some("GBP"),
        "CA" => Some("CAD"),
        "AU" => Some("AUD"),
        "JP" => Some("JPY"),
        "IN" => Some("INR"),
        "DE" | "FR" | "ES" | "IT" | "NL" | "IE" | "PT" | "FI" | "AT" | "BE" => Some("EUR"),
        "CN" => Some("CNY"),
        "BR" => Some("BRL"),
        "MX" => Some("MXN"),
        _ => None,
    }
}

fn date_format_for_country(country: &str) -> DateFormat {
    match country {
        "US" => DateFormat::Mdy,
        "CN" | "JP" | "KR" | "HU" | "LT" | "LV" => DateFormat::Ymd,
        _ => DateFormat::Dmy,
    }
}

fn time_format_for_country(country: &str) -> TimeFormat {
    match country {
        "US" | "AU" | "PH" | "CA" => TimeFormat::Hour12,
        _ => TimeFormat::Hour24,
    }
}

fn timezone_guess_for_country(country: &str) -> Option<&'static str> {
    match country {
        "US" => Some("America/New_York"),
        "GB" => Some("Europe/London"),
        "DE" => Some("Europe/Berlin"),
        "FR" => Some("Europe/Paris"),
        "JP" => Some("Asia/Tokyo"),
        "AU" => Some("Australia/Sydney"),
        "IN" => Some("Asia/Kolkata"),
        "BR" => Some("America/Sao_Paulo"),
        "CN" => Some("Asia/Shanghai"),
        _ => None,
    }
}

fn cultural_region(country: &str) -> Option<CulturalDefaults> {
    let (region_label, formality, directness, context_dependency, punctuality, weekend_days): (
        &str, &'static str, &'static str, &'static str, &'static str, &'static [&'static str],
    ) = match country {
        "US" | "CA" | "AU" | "GB" => (
            "anglosphere", "moderate", "high", "low", "moderate", &["Saturday", "Sunday"],
        ),
        "JP" | "KR" | "CN" => (
            "east_asia", "high", "low", "high", "high", &["Saturday", "Sunday"],
        ),
        "DE" | "NL" | "AT" | "CH" => (
            "northern_europe", "moderate", "high", "low", "high", &["Saturday", "Sunday"],
        ),
        "FR" | "ES" | "IT" | "PT" => (
            "southern_europe", "high", "moderate", "moderate", "moderate", &["Saturday", "Sunday"],
        ),
        "AE" | "SA" | "EG" => (
            "middle_east", "high", "low", "high", "moderate", &["Friday", "Saturday"],
        ),
        "IN" => ("south_asia", "high", "moderate", "high", "moderate", &["Saturday", "Sunday"]),
        "BR" | "MX" | "AR" => (
            "latin_america", "moderate", "moderate", "high", "low", &["Saturday", "Sunday"],
        ),
        _ => return None,
    };
    Some(CulturalDefaults {
        region_label: region_label.to_string(),
        formality,
        directness,
        context_dependency,
        punctuality,
        weekend_days,
    })
}

/// Builds a [`SpatialContext`] from whatever of `(locale, country, region,
/// timezone)` the caller supplied. Falls back through explicit country then
/// locale-derived country.
pub fn build_spatial_context(
    locale: Option<&str>,
    country: Option<&str>,
    timezone_supplied: bool,
) -> SpatialContext {
    let parsed = locale.map(parse_locale);
    let resolved_country = country
        .map(|c| c.to_ascii_uppercase())
        .or_else(|| parsed.as_ref().and_then(|p| p.country.clone()));

    let measurement_system = match &resolved_country {
        Some(c) if IMPERIAL_COUNTRIES.contains(&c.as_str()) => MeasurementSystem::Imperial,
        _ => MeasurementSystem::Metric,
    };

    let currency = resolved_country.as_deref().and_then(currency_for_country);
    let date_format = resolved_country
        .as_deref()
        .map(date_format_for_country)
        .unwrap_or(DateFormat::Dmy);
    let time_format = resolved_country
        .as_deref()
        .map(time_format_for_country)
        .unwrap_or(TimeFormat::Hour24);
    let default_timezone_guess = if timezone_supplied {
        None
    } else {
        resolved_country.as_deref().and_then(timezone_guess_for_country)
    };
    let cultural = resolved_country.as_deref().and_then(cultural_region);

    SpatialContext {
        country: resolved_country,
        currency,
        measurement_system,
        date_format,
        time_format,
        default_timezone_guess,
        cultural,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationResolution {
    pub resolved: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Resolves the literal reference `"here"`. Named references like "home" or
/// "office" are explicitly unresolved at this layer -- downstream profile
/// systems own that mapping.
pub fn resolve_here(explicit_consent: bool) -> LocationResolution {
    if explicit_consent {
        LocationResolution {
            resolved: true,
            confidence: 0.9,
            reason: "Resolved 'here' to the user's stored spatial context under explicit consent."
                .to_string(),
        }
    } else {
        LocationResolution {
            resolved: false,
            confidence: 0.2,
            reason: "Location unavailable without consent".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_script_country() {
        let parsed = parse_locale("zh-Hans-CN");
        assert_eq!(parsed.language, "zh");
        assert_eq!(parsed.script.as_deref(), Some("Hans"));
        assert_eq!(parsed.country.as_deref(), Some("CN"));
    }

    #[test]
    fn falls_back_from_locale_when_country_absent() {
        let ctx = build_spatial_context(Some("en-US"), None, false);
        assert_eq!(ctx.country.as_deref(), Some("US"));
        assert_eq!(ctx.measurement_system, MeasurementSystem::Imperial);
        assert_eq!(ctx.currency, Some("USD"));
    }

    #[test]
    fn explicit_country_wins_over_locale() {
        let ctx = build_spatial_context(Some("en-US"), Some("de"), false);
        assert_eq!(ctx.country.as_deref(), Some("DE"));
        assert_eq!(ctx.measurement_system, MeasurementSystem::Metric);
    }

    #[test]
    fn here_requires_consent() {
        let denied = resolve_here(false);
        assert!(!denied.resolved);
        assert_eq!(denied.confidence, 0.2);

        let allowed = resolve_here(true);
        assert!(allowed.resolved);
        assert_eq!(allowed.confidence, 0.9);
    }
}
