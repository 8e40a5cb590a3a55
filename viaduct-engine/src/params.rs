//! Parameter grammar (§4.I).
//!
//! Parses the query-string shape of route/nearest/table/trip/match URIs
//! into typed parameter records. A parse succeeds only if every character
//! of the input is consumed by some recognized parameter; anything left
//! over, or a value that doesn't match its grammar, is `InvalidQuery` (bad
//! shape) or `InvalidOptions` (unrecognized value for a known parameter).
//!
//! The base/service parameter split (coordinates, hints, radiuses, bearings
//! shared; steps/geometries/overview/annotations/alternatives/
//! continue_straight on route only, etc.) follows
//! `include/server/api/*_grammar.hpp` and `route_parameters_parser.cpp` in
//! the OSRM source this is ported from.

use viaduct_common::{parse_fixed_degrees, Coordinate, Error, ErrorCode, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BaseParams {
    pub coordinates: Vec<Coordinate>,
    pub hints: Vec<Option<String>>,
    pub radiuses: Vec<Option<f64>>,
    pub bearings: Vec<Option<(u16, u16)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometries {
    GeoJson,
    Polyline,
    Polyline6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overview {
    Simplified,
    Full,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Annotations {
    pub duration: bool,
    pub nodes: bool,
    pub distance: bool,
}

impl Annotations {
    pub fn all() -> Self {
        Annotations {
            duration: true,
            nodes: true,
            distance: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueStraight {
    True,
    False,
    /// Distinct from both `true` and `false`: defers to the profile's own
    /// default bearing-continuity behavior (§9 Open Question 3; decision
    /// recorded in DESIGN.md).
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteParams {
    pub base: BaseParams,
    pub steps: bool,
    pub geometries: Geometries,
    pub overview: Overview,
    pub annotations: Annotations,
    pub alternatives: bool,
    pub continue_straight: ContinueStraight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestParams {
    pub base: BaseParams,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexSelector {
    All,
    Subset(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableParams {
    pub base: BaseParams,
    pub sources: IndexSelector,
    pub destinations: IndexSelector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripParams {
    pub base: BaseParams,
    pub source: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapsPolicy {
    Split,
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchParams {
    pub base: BaseParams,
    pub timestamps: Vec<i64>,
    pub gaps: GapsPolicy,
    pub tidy: bool,
}

/// A flat, already-percent-decoded `key -> value` view of a query string.
/// Building this once up front lets each grammar consume the keys it
/// understands and detect leftovers cheaply.
struct QueryMap<'a> {
    pairs: Vec<(&'a str, String)>,
}

impl<'a> QueryMap<'a> {
    fn parse(query: &'a str) -> Result<Self> {
        let mut pairs = Vec::new();
        if query.is_empty() {
            return Ok(QueryMap { pairs });
        }
        for part in query.split('&') {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::invalid_query(format!("malformed parameter '{part}'")))?;
            pairs.push((key, percent_decode(value)?));
        }
        Ok(QueryMap { pairs })
    }

    /// Removes and returns the value for `key`, failing if it appears more
    /// than once (the grammar has no "repeat wins" rule).
    fn take(&mut self, key: &str) -> Option<String> {
        let pos = self.pairs.iter().position(|(k, _)| *k == key)?;
        Some(self.pairs.remove(pos).1)
    }

    fn finish(self) -> Result<()> {
        if let Some((key, _)) = self.pairs.first() {
            return Err(Error::invalid_query(format!("unrecognized parameter '{key}'")));
        }
        Ok(())
    }
}

fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::invalid_query("truncated percent-escape"))?;
                let hex = std::str::from_utf8(hex).map_err(|_| Error::invalid_query("bad percent-escape"))?;
                let byte = u8::from_str_radix(hex, 16).map_err(|_| Error::invalid_query("bad percent-escape"))?;
                out.push(byte);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::invalid_query("query parameter is not valid utf-8"))
}

/// Parses `{coords}` from a path segment: `lon,lat;lon,lat;...` or
/// `polyline(<encoded>)`.
pub fn parse_coordinates(segment: &str) -> Result<Vec<Coordinate>> {
    if let Some(encoded) = segment.strip_prefix("polyline(").and_then(|s| s.strip_suffix(')')) {
        return decode_polyline(encoded, 1e5);
    }
    if segment.is_empty() {
        return Err(Error::invalid_query("empty coordinate list"));
    }
    segment.split(';').map(parse_one_coordinate).collect()
}

fn parse_one_coordinate(pair: &str) -> Result<Coordinate> {
    let (lon_str, lat_str) = pair
        .split_once(',')
        .ok_or_else(|| Error::invalid_query(format!("malformed coordinate '{pair}'")))?;
    let lon = parse_fixed_degrees(lon_str).ok_or_else(|| Error::invalid_query(format!("bad longitude '{lon_str}'")))?;
    let lat = parse_fixed_degrees(lat_str).ok_or_else(|| Error::invalid_query(format!("bad latitude '{lat_str}'")))?;
    Ok(Coordinate::new(lon, lat))
}

fn parse_semicolon_list<T, F: Fn(&str) -> Result<T>>(raw: &str, count: usize, f: F) -> Result<Vec<T>> {
    let parts: Vec<&str> = raw.split(';').collect();
    if parts.len() != count {
        return Err(Error::invalid_options(format!(
            "expected {count} semicolon-separated values, found {}",
            parts.len()
        )));
    }
    parts.into_iter().map(|p| f(p)).collect()
}

fn parse_base(map: &mut QueryMap, num_coords: usize) -> Result<BaseParams> {
    let hints = match map.take("hints") {
        Some(raw) => parse_semicolon_list(&raw, num_coords, |p| {
            Ok(if p.is_empty() { None } else { Some(p.to_string()) })
        })?,
        None => vec![None; num_coords],
    };
    let radiuses = match map.take("radiuses") {
        Some(raw) => parse_semicolon_list(&raw, num_coords, |p| {
            if p.is_empty() || p == "unlimited" {
                return Ok(None);
            }
            p.parse::<f64>()
                .map(Some)
                .map_err(|_| Error::invalid_value(format!("bad radius '{p}'")))
        })?,
        None => vec![None; num_coords],
    };
    let bearings = match map.take("bearings") {
        Some(raw) => parse_semicolon_list(&raw, num_coords, parse_one_bearing)?,
        None => vec![None; num_coords],
    };
    Ok(BaseParams {
        coordinates: Vec::new(), // filled in by the caller, which already has them
        hints,
        radiuses,
        bearings,
    })
}

fn parse_one_bearing(raw: &str) -> Result<Option<(u16, u16)>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let (value, range) = raw
        .split_once(',')
        .ok_or_else(|| Error::invalid_value(format!("malformed bearing '{raw}'")))?;
    let value: u16 = value.parse().map_err(|_| Error::invalid_value("bad bearing value"))?;
    let range: u16 = range.parse().map_err(|_| Error::invalid_value("bad bearing range"))?;
    if value > 360 {
        return Err(Error::invalid_value("bearing value out of range"));
    }
    Ok(Some((value, range)))
}

pub fn parse_route_params(coords: &[Coordinate], query: &str) -> Result<RouteParams> {
    if coords.len() < 2 {
        return Err(Error::invalid_query("route requires at least two coordinates"));
    }
    let mut map = QueryMap::parse(query)?;
    let mut base = parse_base(&mut map, coords.len())?;
    base.coordinates = coords.to_vec();

    let steps = parse_bool_flag(&mut map, "steps", false)?;
    let geometries = match map.take("geometries").as_deref() {
        Some("geojson") | None => Geometries::GeoJson,
        Some("polyline") => Geometries::Polyline,
        Some("polyline6") => Geometries::Polyline6,
        Some(other) => return Err(Error::invalid_options(format!("unknown geometries value '{other}'"))),
    };
    let overview = match map.take("overview").as_deref() {
        Some("simplified") | None => Overview::Simplified,
        Some("full") => Overview::Full,
        Some("false") => Overview::False,
        Some(other) => return Err(Error::invalid_options(format!("unknown overview value '{other}'"))),
    };
    let annotations = match map.take("annotations") {
        None => Annotations::default(),
        Some(raw) => parse_annotations(&raw)?,
    };
    let alternatives = parse_bool_flag(&mut map, "alternatives", false)?;
    let continue_straight = match map.take("continue_straight").as_deref() {
        Some("true") => ContinueStraight::True,
        Some("false") => ContinueStraight::False,
        Some("default") | None => ContinueStraight::Default,
        Some(other) => {
            return Err(Error::invalid_options(format!(
                "unknown continue_straight value '{other}'"
            )))
        }
    };

    map.finish()?;
    Ok(RouteParams {
        base,
        steps,
        geometries,
        overview,
        annotations,
        alternatives,
        continue_straight,
    })
}

fn parse_annotations(raw: &str) -> Result<Annotations> {
    if raw == "none" {
        return Ok(Annotations::default());
    }
    if raw == "all" {
        return Ok(Annotations::all());
    }
    let mut annotations = Annotations::default();
    for part in raw.split(',') {
        match part {
            "duration" => annotations.duration = true,
            "nodes" => annotations.nodes = true,
            "distance" => annotations.distance = true,
            other => return Err(Error::invalid_options(format!("unknown annotations value '{other}'"))),
        }
    }
    Ok(annotations)
}

fn parse_bool_flag(map: &mut QueryMap, key: &str, default: bool) -> Result<bool> {
    match map.take(key).as_deref() {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(Error::invalid_options(format!("'{key}' must be true or false, found '{other}'"))),
    }
}

pub fn parse_nearest_params(coords: &[Coordinate], query: &str) -> Result<NearestParams> {
    if coords.len() != 1 {
        return Err(Error::invalid_query("nearest requires exactly one coordinate"));
    }
    let mut map = QueryMap::parse(query)?;
    let mut base = parse_base(&mut map, coords.len())?;
    base.coordinates = coords.to_vec();
    let number = match map.take("number") {
        None => 1,
        Some(raw) => raw.parse::<u32>().map_err(|_| Error::invalid_value("bad 'number' value"))?,
    };
    if number == 0 {
        return Err(Error::invalid_value("'number' must be at least 1"));
    }
    map.finish()?;
    Ok(NearestParams { base, number })
}

pub fn parse_table_params(coords: &[Coordinate], query: &str) -> Result<TableParams> {
    if coords.is_empty() {
        return Err(Error::invalid_query("table requires at least one coordinate"));
    }
    let mut map = QueryMap::parse(query)?;
    let mut base = parse_base(&mut map, coords.len())?;
    base.coordinates = coords.to_vec();
    let sources = parse_index_selector(map.take("sources"), coords.len())?;
    let destinations = parse_index_selector(map.take("destinations"), coords.len())?;
    map.finish()?;
    Ok(TableParams {
        base,
        sources,
        destinations,
    })
}

fn parse_index_selector(raw: Option<String>, num_coords: usize) -> Result<IndexSelector> {
    match raw.as_deref() {
        None | Some("all") => Ok(IndexSelector::All),
        Some(list) => {
            let mut indices = Vec::new();
            for part in list.split(';') {
                let idx: usize = part.parse().map_err(|_| Error::invalid_value(format!("bad index '{part}'")))?;
                if idx >= num_coords {
                    return Err(Error::invalid_value(format!("index {idx} out of range")));
                }
                indices.push(idx);
            }
            Ok(IndexSelector::Subset(indices))
        }
    }
}

pub fn parse_trip_params(coords: &[Coordinate], query: &str) -> Result<TripParams> {
    if coords.len() < 2 {
        return Err(Error::invalid_query("trip requires at least two coordinates"));
    }
    let mut map = QueryMap::parse(query)?;
    let mut base = parse_base(&mut map, coords.len())?;
    base.coordinates = coords.to_vec();
    let source = map.take("source");
    let destination = map.take("destination");
    map.finish()?;
    Ok(TripParams {
        base,
        source,
        destination,
    })
}

pub fn parse_match_params(coords: &[Coordinate], query: &str) -> Result<MatchParams> {
    if coords.len() < 2 {
        return Err(Error::invalid_query("match requires at least two coordinates"));
    }
    let mut map = QueryMap::parse(query)?;
    let mut base = parse_base(&mut map, coords.len())?;
    base.coordinates = coords.to_vec();
    let timestamps = match map.take("timestamps") {
        None => Vec::new(),
        Some(raw) => parse_semicolon_list(&raw, coords.len(), |p| {
            p.parse::<i64>().map_err(|_| Error::invalid_value(format!("bad timestamp '{p}'")))
        })?,
    };
    let gaps = match map.take("gaps").as_deref() {
        Some("split") | None => GapsPolicy::Split,
        Some("ignore") => GapsPolicy::Ignore,
        Some(other) => return Err(Error::invalid_options(format!("unknown gaps value '{other}'"))),
    };
    let tidy = parse_bool_flag(&mut map, "tidy", false)?;
    map.finish()?;
    Ok(MatchParams {
        base,
        timestamps,
        gaps,
        tidy,
    })
}

/// Encodes coordinates with the Google polyline algorithm at the given
/// precision (1e5 for `polyline`, 1e6 for `polyline6`).
pub fn encode_polyline(coords: &[Coordinate], precision: f64) -> String {
    let mut out = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;
    for c in coords {
        let lat = (c.lat_degrees() * precision).round() as i64;
        let lon = (c.lon_degrees() * precision).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lon - prev_lon, &mut out);
        prev_lat = lat;
        prev_lon = lon;
    }
    out
}

fn encode_value(value: i64, out: &mut String) {
    let shifted = value << 1;
    let mut v = (if value < 0 { !shifted } else { shifted }) as u64;
    loop {
        let mut chunk = (v & 0x1f) as u8;
        v >>= 5;
        if v != 0 {
            chunk |= 0x20;
        }
        out.push((chunk + 63) as char);
        if v == 0 {
            break;
        }
    }
}

fn decode_polyline(encoded: &str, precision: f64) -> Result<Vec<Coordinate>> {
    let bytes = encoded.as_bytes();
    let mut i = 0;
    let mut lat = 0i64;
    let mut lon = 0i64;
    let mut out = Vec::new();
    while i < bytes.len() {
        let (dlat, next) = decode_value(bytes, i)?;
        i = next;
        let (dlon, next) = decode_value(bytes, i)?;
        i = next;
        lat += dlat;
        lon += dlon;
        out.push(Coordinate::from_degrees(lon as f64 / precision, lat as f64 / precision));
    }
    Ok(out)
}

fn decode_value(bytes: &[u8], mut i: usize) -> Result<(i64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let b = *bytes
            .get(i)
            .ok_or_else(|| Error::invalid_query("truncated polyline"))? as i64
            - 63;
        result |= ((b & 0x1f) as u64) << shift;
        i += 1;
        if b < 0x20 {
            break;
        }
        shift += 5;
    }
    let value = if result & 1 != 0 {
        !(result >> 1) as i64
    } else {
        (result >> 1) as i64
    };
    Ok((value, i))
}
