//! Lookup tables mapping source vocabularies to ReliefWeb taxonomy term IDs.
//!
//! Tables are built once at startup and shared by reference with every
//! adapter (see [`Taxonomy`]). Building a table fails on a repeated key
//! instead of letting the later entry silently win.

use std::collections::HashMap;

use crate::error::TaxonomyError;

/// Country term used when no country could be mapped.
pub const WORLD: i64 = 254;

/// Language term used when no language could be mapped (English).
pub const DEFAULT_LANGUAGE: i64 = 267;

/// Format term used when no format could be mapped (Other).
pub const DEFAULT_FORMAT: i64 = 9;

/// A case-insensitive string → term ID table.
#[derive(Debug, Clone)]
pub struct LookupTable {
    entries: HashMap<String, i64>,
}

impl LookupTable {
    /// Build a table, rejecting keys that appear twice (ignoring case and
    /// surrounding whitespace).
    pub fn build<'a, I>(name: &str, pairs: I) -> Result<Self, TaxonomyError>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut entries = HashMap::new();
        for (key, id) in pairs {
            let normalized = normalize_key(key);
            if entries.insert(normalized.clone(), id).is_some() {
                return Err(TaxonomyError::DuplicateKey {
                    table: name.to_string(),
                    key: normalized,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(&normalize_key(key)).copied()
    }

    /// Map every key, dropping unknown ones and repeated IDs while keeping
    /// first-seen order.
    pub fn map_all<'a, I>(&self, keys: I) -> Vec<i64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids = Vec::new();
        for key in keys {
            if let Some(id) = self.get(key) {
                push_unique(&mut ids, id);
            }
        }
        ids
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Append `id` unless already present.
pub fn push_unique(ids: &mut Vec<i64>, id: i64) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Countries, looked up by ISO3 code or by name.
#[derive(Debug, Clone)]
pub struct CountryTable {
    by_iso3: LookupTable,
    by_name: LookupTable,
    names_by_id: HashMap<i64, Vec<String>>,
}

impl CountryTable {
    /// Build from `(iso3, id, names)` rows. The first name is the canonical
    /// one; the rest are aliases.
    pub fn build(rows: &[(&str, i64, &[&str])]) -> Result<Self, TaxonomyError> {
        let by_iso3 = LookupTable::build(
            "country_iso3",
            rows.iter().map(|(iso3, id, _)| (*iso3, *id)),
        )?;
        let by_name = LookupTable::build(
            "country_name",
            rows.iter()
                .flat_map(|(_, id, names)| names.iter().map(move |name| (*name, *id))),
        )?;

        let mut names_by_id: HashMap<i64, Vec<String>> = HashMap::new();
        for (_, id, names) in rows {
            names_by_id
                .entry(*id)
                .or_default()
                .extend(names.iter().map(|n| n.to_lowercase()));
        }

        Ok(Self {
            by_iso3,
            by_name,
            names_by_id,
        })
    }

    pub fn by_iso3(&self, iso3: &str) -> Option<i64> {
        self.by_iso3.get(iso3)
    }

    pub fn by_name(&self, name: &str) -> Option<i64> {
        self.by_name.get(name)
    }

    /// Move the country mentioned earliest in `title` to the front. Without a
    /// mention the source order is kept.
    pub fn prioritize_by_title(&self, title: &str, countries: Vec<i64>) -> Vec<i64> {
        let title = title.to_lowercase();
        let primary = countries
            .iter()
            .filter_map(|id| {
                self.names_by_id
                    .get(id)?
                    .iter()
                    .filter_map(|name| find_word(&title, name))
                    .min()
                    .map(|position| (position, *id))
            })
            .min()
            .map(|(_, id)| id);

        match primary {
            Some(id) => {
                let mut ordered = vec![id];
                ordered.extend(countries.into_iter().filter(|c| *c != id));
                ordered
            }
            None => countries,
        }
    }

    /// Countries mentioned anywhere in `text`, in order of appearance.
    pub fn mentioned_in(&self, text: &str) -> Vec<i64> {
        let text = text.to_lowercase();
        let mut found: Vec<(usize, i64)> = self
            .names_by_id
            .iter()
            .filter_map(|(id, names)| {
                names
                    .iter()
                    .filter_map(|name| find_word(&text, name))
                    .min()
                    .map(|position| (position, *id))
            })
            .collect();
        found.sort();
        found.into_iter().map(|(_, id)| id).collect()
    }
}

/// Byte position of `needle` in `haystack` as a whole word.
fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let mut start = 0;
    while let Some(offset) = haystack[start..].find(needle) {
        let position = start + offset;
        let end = position + needle.len();
        let before = haystack[..position].chars().next_back();
        let after = haystack[end..].chars().next();
        let boundary = |c: Option<char>| c.is_none_or(|c| !c.is_alphanumeric());
        if boundary(before) && boundary(after) {
            return Some(position);
        }
        start = position + needle.chars().next().map_or(1, char::len_utf8);
    }
    None
}

/// All shared lookup tables.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    pub countries: CountryTable,
    pub languages: LookupTable,
    pub formats: LookupTable,
    pub themes: LookupTable,
    pub career_categories: LookupTable,
}

impl Taxonomy {
    /// The ReliefWeb vocabularies.
    pub fn reliefweb() -> Result<Self, TaxonomyError> {
        Ok(Self {
            countries: CountryTable::build(COUNTRIES)?,
            languages: LookupTable::build("language", LANGUAGES.iter().copied())?,
            formats: LookupTable::build("format", FORMATS.iter().copied())?,
            themes: LookupTable::build("theme", THEMES.iter().copied())?,
            career_categories: LookupTable::build(
                "career_category",
                CAREER_CATEGORIES.iter().copied(),
            )?,
        })
    }
}

const COUNTRIES: &[(&str, i64, &[&str])] = &[
    ("AFG", 13, &["Afghanistan"]),
    ("AGO", 18, &["Angola"]),
    ("ARM", 22, &["Armenia"]),
    ("AZE", 26, &["Azerbaijan"]),
    ("BGD", 31, &["Bangladesh"]),
    ("BDI", 48, &["Burundi"]),
    ("BEN", 37, &["Benin"]),
    ("BFA", 47, &["Burkina Faso"]),
    ("BOL", 40, &["Bolivia", "Bolivia (Plurinational State of)"]),
    ("BRA", 44, &["Brazil"]),
    ("CAF", 55, &["Central African Republic"]),
    ("CHN", 60, &["China"]),
    ("CMR", 52, &["Cameroon"]),
    ("COD", 75, &["Democratic Republic of the Congo", "DR Congo", "DRC"]),
    ("COG", 74, &["Congo", "Republic of the Congo"]),
    ("COL", 71, &["Colombia"]),
    ("CUB", 78, &["Cuba"]),
    ("DJI", 83, &["Djibouti"]),
    ("DOM", 85, &["Dominican Republic"]),
    ("ECU", 87, &["Ecuador"]),
    ("EGY", 88, &["Egypt"]),
    ("ERI", 91, &["Eritrea"]),
    ("ETH", 93, &["Ethiopia"]),
    ("FJI", 96, &["Fiji"]),
    ("GHA", 104, &["Ghana"]),
    ("GIN", 111, &["Guinea"]),
    ("GTM", 109, &["Guatemala"]),
    ("HND", 117, &["Honduras"]),
    ("HTI", 115, &["Haiti"]),
    ("IDN", 121, &["Indonesia"]),
    ("IND", 120, &["India"]),
    ("IRN", 122, &["Iran", "Iran (Islamic Republic of)"]),
    ("IRQ", 123, &["Iraq"]),
    ("JOR", 129, &["Jordan"]),
    ("KEN", 131, &["Kenya"]),
    ("KHM", 49, &["Cambodia"]),
    ("LAO", 138, &["Lao PDR", "Laos", "Lao People's Democratic Republic"]),
    ("LBN", 140, &["Lebanon"]),
    ("LBR", 142, &["Liberia"]),
    ("LBY", 143, &["Libya"]),
    ("LKA", 207, &["Sri Lanka"]),
    ("MDG", 148, &["Madagascar"]),
    ("MLI", 152, &["Mali"]),
    ("MMR", 165, &["Myanmar"]),
    ("MNG", 163, &["Mongolia"]),
    ("MOZ", 164, &["Mozambique"]),
    ("MRT", 155, &["Mauritania"]),
    ("MWI", 149, &["Malawi"]),
    ("NER", 172, &["Niger"]),
    ("NGA", 173, &["Nigeria"]),
    ("NPL", 168, &["Nepal"]),
    ("PAK", 179, &["Pakistan"]),
    ("PER", 184, &["Peru"]),
    ("PHL", 185, &["Philippines"]),
    ("PNG", 182, &["Papua New Guinea"]),
    ("PRK", 134, &["Democratic People's Republic of Korea", "North Korea"]),
    ("PSE", 180, &["occupied Palestinian territory", "Palestine", "State of Palestine"]),
    ("RWA", 190, &["Rwanda"]),
    ("SDN", 208, &["Sudan"]),
    ("SEN", 198, &["Senegal"]),
    ("SLE", 201, &["Sierra Leone"]),
    ("SLV", 89, &["El Salvador"]),
    ("SOM", 204, &["Somalia"]),
    ("SSD", 8657, &["South Sudan"]),
    ("SYR", 212, &["Syrian Arab Republic", "Syria"]),
    ("TCD", 59, &["Chad"]),
    ("TLS", 220, &["Timor-Leste"]),
    ("TUR", 224, &["Türkiye", "Turkey"]),
    ("TZA", 217, &["United Republic of Tanzania", "Tanzania"]),
    ("UGA", 229, &["Uganda"]),
    ("UKR", 230, &["Ukraine"]),
    ("VEN", 240, &["Venezuela", "Venezuela (Bolivarian Republic of)"]),
    ("VNM", 241, &["Viet Nam", "Vietnam"]),
    ("VUT", 238, &["Vanuatu"]),
    ("YEM", 225, &["Yemen"]),
    ("ZMB", 248, &["Zambia"]),
    ("ZWE", 249, &["Zimbabwe"]),
    ("WLD", WORLD, &["World", "Global"]),
];

const LANGUAGES: &[(&str, i64)] = &[
    ("en", 267),
    ("eng", 267),
    ("English", 267),
    ("fr", 268),
    ("fre", 268),
    ("French", 268),
    ("es", 269),
    ("spa", 269),
    ("Spanish", 269),
    ("ar", 6876),
    ("ara", 6876),
    ("Arabic", 6876),
    ("ru", 10906),
    ("rus", 10906),
    ("Russian", 10906),
    ("Other", 31996),
];

const FORMATS: &[(&str, i64)] = &[
    ("Analysis", 3),
    ("Appeal", 4),
    ("Assessment", 5),
    ("Evaluation and Lessons Learned", 6),
    ("Manual and Guideline", 7),
    ("News and Press Release", 8),
    ("Other", DEFAULT_FORMAT),
    ("Situation Report", 10),
    ("UN Document", 11),
    ("Map", 12),
    ("Infographic", 12570),
    ("Interactive", 38974),
];

const THEMES: &[(&str, i64)] = &[
    ("Agriculture", 4587),
    ("Climate Change and Environment", 4588),
    ("Contributions", 4589),
    ("Coordination", 4590),
    ("Disaster Management", 4591),
    ("Education", 4592),
    ("Food and Nutrition", 4593),
    ("Gender", 4594),
    ("Health", 4595),
    ("HIV/Aids", 4596),
    ("Humanitarian Financing", 4597),
    ("Logistics and Telecommunications", 4598),
    ("Mine Action", 4599),
    ("Peacekeeping and Peacebuilding", 4600),
    ("Protection and Human Rights", 4601),
    ("Recovery and Reconstruction", 4602),
    ("Safety and Security", 4603),
    ("Shelter and Non-Food Items", 4604),
    ("Water Sanitation Hygiene", 4605),
];

const CAREER_CATEGORIES: &[(&str, i64)] = &[
    ("Administration/Finance", 6863),
    ("Donor Relations/Grants Management", 6864),
    ("Human Resources", 6865),
    ("Information and Communications Technology", 6866),
    ("Information Management", 6867),
    ("Logistics/Procurement", 6868),
    ("Advocacy/Communications", 6869),
    ("Monitoring and Evaluation", 6870),
    ("Program/Project Management", 6871),
];
