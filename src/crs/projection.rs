use std::{fmt, fs, path::Path, str::FromStr, sync::OnceLock};

use crate::error::ProjectionError;

use super::crs_utils::{
    epsg_code_to_authority_string, esri_wkt_from_database, identify_crs, EpsgCode,
};

/// Esri WKT of the WGS 1984 geographic system (EPSG:4326).
pub const WGS1984_WKT: &str = "GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\",SPHEROID[\"WGS_1984\",6378137.0,298.257223563]],PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]]";

/// Esri WKT of WGS 1984 Web Mercator (auxiliary sphere), WKID 102100 / EPSG:3857.
pub const WEB_MERCATOR_WKT: &str = "PROJCS[\"WGS_1984_Web_Mercator_Auxiliary_Sphere\",GEOGCS[\"GCS_WGS_1984\",DATUM[\"D_WGS_1984\",SPHEROID[\"WGS_1984\",6378137.0,298.257223563]],PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]],PROJECTION[\"Mercator_Auxiliary_Sphere\"],PARAMETER[\"False_Easting\",0.0],PARAMETER[\"False_Northing\",0.0],PARAMETER[\"Central_Meridian\",0.0],PARAMETER[\"Standard_Parallel_1\",0.0],PARAMETER[\"Auxiliary_Sphere_Type\",0.0],UNIT[\"Meter\",1.0]]";

/// Esri WKIDs that Esri JSON still writes next to the EPSG code that superseded them,
/// as (wkid, latest wkid). Other legacy WKIDs are resolved through the PROJ database.
const LEGACY_ESRI_WKIDS: &[(i32, i32)] = &[
    (102100, 3857),
    (102113, 3785),
    (102728, 2271),
    (102729, 2272),
];

const ROOT_KEYWORDS: &[&str] = &[
    "GEOGCS", "PROJCS", "GEOCCS", "VERTCS", "VERT_CS", "COMPD_CS", "GEOGCRS", "PROJCRS",
    "GEODCRS", "BOUNDCRS", "COMPOUNDCRS",
];

#[derive(Debug, Clone, PartialEq)]
pub enum WktValue {
    Text(String),
    Number(f64),
    /// Bare identifiers such as axis directions (`NORTH`).
    Keyword(String),
    Node(WktNode),
}

/// One `KEYWORD[arg, ...]` element of a WKT tree.
#[derive(Debug, Clone, PartialEq)]
pub struct WktNode {
    pub keyword: String,
    pub args: Vec<WktValue>,
}

impl WktNode {
    /// First quoted argument, which is the name for every CRS element.
    pub fn name(&self) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            WktValue::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = &WktNode> {
        self.args.iter().filter_map(|arg| match arg {
            WktValue::Node(node) => Some(node),
            _ => None,
        })
    }

    pub fn child(&self, keyword: &str) -> Option<&WktNode> {
        self.children()
            .find(|node| node.keyword.eq_ignore_ascii_case(keyword))
    }

    /// Depth-first search, this node included.
    pub fn find(&self, keyword: &str) -> Option<&WktNode> {
        if self.keyword.eq_ignore_ascii_case(keyword) {
            return Some(self);
        }
        self.children().find_map(|child| child.find(keyword))
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    Geographic,
    Projected,
    Other,
}

/// Parsed coordinate reference system. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionDefinition {
    wkt: String,
    root: WktNode,
    /// From the root AUTHORITY node, or identified in the PROJ database.
    epsg: Option<EpsgCode>,
}

impl ProjectionDefinition {
    pub fn parse(text: &str) -> Result<Self, ProjectionError> {
        let text = text.trim_start_matches('\u{feff}').trim();
        if text.is_empty() {
            return Err(ProjectionError::Empty);
        }
        let root = WktParser::new(text).parse_document()?;
        if !ROOT_KEYWORDS
            .iter()
            .any(|keyword| root.keyword.eq_ignore_ascii_case(keyword))
        {
            return Err(ProjectionError::Parse {
                position: 0,
                message: format!("'{}' is not a coordinate system element", root.keyword),
            });
        }
        let epsg = authority_code(&root).or_else(|| identify_crs(text, "EPSG"));
        Ok(Self {
            wkt: text.to_string(),
            root,
            epsg,
        })
    }

    /// Read and parse a `.prj` sidecar file.
    pub fn from_file(path: &Path) -> Result<Self, ProjectionError> {
        let text = fs::read_to_string(path).map_err(|source| ProjectionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn wgs1984() -> Self {
        static WGS1984: OnceLock<ProjectionDefinition> = OnceLock::new();
        WGS1984
            .get_or_init(|| Self::builtin(WGS1984_WKT, 4326))
            .clone()
    }

    pub fn web_mercator() -> Self {
        static WEB_MERCATOR: OnceLock<ProjectionDefinition> = OnceLock::new();
        WEB_MERCATOR
            .get_or_init(|| Self::builtin(WEB_MERCATOR_WKT, 3857))
            .clone()
    }

    /// Definition for an Esri WKID or EPSG code from the PROJ database.
    pub fn from_wkid(wkid: i32) -> Option<Self> {
        let latest = latest_wkid_for(wkid);
        match latest {
            4326 => return Some(Self::wgs1984()),
            3857 => return Some(Self::web_mercator()),
            _ => {}
        }
        let code = EpsgCode::try_from(latest).ok()?;
        let wkt = esri_wkt_from_database("EPSG", code)?;
        let definition = Self::parse(&wkt).ok()?;
        Some(Self {
            epsg: Some(code),
            ..definition
        })
    }

    fn builtin(wkt: &str, epsg: EpsgCode) -> Self {
        let root = match WktParser::new(wkt).parse_document() {
            Ok(root) => root,
            Err(err) => unreachable!("built-in WKT does not parse: {}", err),
        };
        Self {
            wkt: wkt.to_string(),
            root,
            epsg: Some(epsg),
        }
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    pub fn name(&self) -> &str {
        self.root.name().unwrap_or("")
    }

    pub fn kind(&self) -> CrsKind {
        match self.root.keyword.to_ascii_uppercase().as_str() {
            "GEOGCS" | "GEOGCRS" => CrsKind::Geographic,
            "PROJCS" | "PROJCRS" => CrsKind::Projected,
            _ => CrsKind::Other,
        }
    }

    pub fn datum_name(&self) -> Option<&str> {
        self.root.find("DATUM").and_then(WktNode::name)
    }

    pub fn projection_name(&self) -> Option<&str> {
        self.root.child("PROJECTION").and_then(WktNode::name)
    }

    pub fn epsg_code(&self) -> Option<EpsgCode> {
        self.epsg
    }

    /// Esri WKID. Systems Esri numbered before EPSG did keep their legacy WKID.
    pub fn wkid(&self) -> Option<i32> {
        let latest = self.latest_wkid()?;
        Some(
            LEGACY_ESRI_WKIDS
                .iter()
                .find(|(_, known_latest)| *known_latest == latest)
                .map(|(wkid, _)| *wkid)
                .unwrap_or(latest),
        )
    }

    pub fn latest_wkid(&self) -> Option<i32> {
        self.epsg.and_then(|code| i32::try_from(code).ok())
    }

    /// Authority string PROJ understands, e.g. "EPSG:4326".
    pub fn authority_string(&self) -> Option<String> {
        self.epsg.map(epsg_code_to_authority_string)
    }

    /// Two definitions describe the same system.
    pub fn same_system(&self, other: &ProjectionDefinition) -> bool {
        match (self.epsg, other.epsg) {
            (Some(a), Some(b)) => a == b,
            _ => self.root == other.root,
        }
    }
}

impl FromStr for ProjectionDefinition {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ProjectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wkt)
    }
}

/// Latest WKID for a possibly superseded Esri WKID. Unknown ids map to themselves.
pub fn latest_wkid_for(wkid: i32) -> i32 {
    if let Some((_, latest)) = LEGACY_ESRI_WKIDS.iter().find(|(known, _)| *known == wkid) {
        return *latest;
    }
    if let Ok(code) = EpsgCode::try_from(wkid) {
        if esri_wkt_from_database("EPSG", code).is_some() {
            return wkid;
        }
    }
    identify_crs(&format!("ESRI:{}", wkid), "EPSG")
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(wkid)
}

/// EPSG code of a root `AUTHORITY["EPSG", code]` or `ID["EPSG", code]` node.
fn authority_code(root: &WktNode) -> Option<EpsgCode> {
    let authority = root.child("AUTHORITY").or_else(|| root.child("ID"))?;
    let mut args = authority.args.iter();
    match args.next() {
        Some(WktValue::Text(name)) if name.eq_ignore_ascii_case("EPSG") => {}
        _ => return None,
    }
    match args.next() {
        Some(WktValue::Text(code)) => code.trim().parse().ok(),
        Some(WktValue::Number(code)) if *code >= 0.0 => Some(*code as EpsgCode),
        _ => None,
    }
}

struct WktParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> WktParser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> ProjectionError {
        ProjectionError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn parse_document(mut self) -> Result<WktNode, ProjectionError> {
        let node = self.parse_node()?;
        self.skip_whitespace();
        if self.pos < self.text.len() {
            return Err(self.error("unexpected trailing content"));
        }
        Ok(node)
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ProjectionError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            self.pos += c.len_utf8();
        }
        if start == self.pos {
            return Err(self.error("expected a keyword"));
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn parse_node(&mut self) -> Result<WktNode, ProjectionError> {
        let keyword = self.parse_identifier()?;
        self.skip_whitespace();
        let close = match self.peek() {
            Some('[') => ']',
            Some('(') => ')',
            _ => return Err(self.error(format!("expected '[' after {}", keyword))),
        };
        self.pos += 1;
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) && args.is_empty() {
                self.pos += 1;
                break;
            }
            args.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    break;
                }
                Some(c) => return Err(self.error(format!("unexpected '{}' in {}", c, keyword))),
                None => return Err(self.error(format!("unterminated {}", keyword))),
            }
        }
        Ok(WktNode { keyword, args })
    }

    fn parse_value(&mut self) -> Result<WktValue, ProjectionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('"') => self.parse_text().map(WktValue::Text),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.parse_number().map(WktValue::Number)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                let identifier = self.parse_identifier()?;
                self.skip_whitespace();
                match self.peek() {
                    Some('[') | Some('(') => {
                        self.pos = start;
                        self.parse_node().map(WktValue::Node)
                    }
                    _ => Ok(WktValue::Keyword(identifier)),
                }
            }
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("unexpected end of definition")),
        }
    }

    fn parse_text(&mut self) -> Result<String, ProjectionError> {
        // Opening quote.
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    // WKT escapes a quote by doubling it.
                    if self.peek() == Some('"') {
                        text.push('"');
                        self.pos += 1;
                    } else {
                        return Ok(text);
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.pos += c.len_utf8();
                }
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn parse_number(&mut self) -> Result<f64, ProjectionError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
                break;
            }
            self.pos += 1;
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|_| self.error(format!("invalid number '{}'", &self.text[start..self.pos])))
    }
}
