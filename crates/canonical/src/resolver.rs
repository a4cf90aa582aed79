use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::types::ConceptMapping;

/// A known synonym list: every alias (and the canonical name itself) resolves
/// to `canonical`. A rule with a category only applies when the caller's
/// category hint is absent or agrees.
pub struct AliasRule {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub category: Option<&'static str>,
}

/// Scientific, common and abbreviated names from the pine wilt literature.
pub const BUILTIN_ALIASES: &[AliasRule] = &[
    AliasRule {
        canonical: "松材线虫",
        aliases: &["Bursaphelenchus xylophilus", "B. xylophilus", "pine wood nematode", "pinewood nematode", "PWN", "松树线虫"],
        category: None,
    },
    AliasRule {
        canonical: "松材线虫病",
        aliases: &["pine wilt disease", "pine wilt", "PWD", "松树萎蔫病", "松枯萎病"],
        category: None,
    },
    AliasRule {
        canonical: "拟松材线虫",
        aliases: &["Bursaphelenchus mucronatus", "B. mucronatus"],
        category: None,
    },
    AliasRule {
        canonical: "松褐天牛",
        aliases: &["Monochamus alternatus", "M. alternatus", "Japanese pine sawyer", "松墨天牛"],
        category: None,
    },
    AliasRule {
        canonical: "云杉花墨天牛",
        aliases: &["Monochamus saltuarius", "M. saltuarius"],
        category: None,
    },
    AliasRule {
        canonical: "马尾松",
        aliases: &["Pinus massoniana", "Masson pine", "Masson's pine"],
        category: None,
    },
    AliasRule {
        canonical: "黑松",
        aliases: &["Pinus thunbergii", "Japanese black pine"],
        category: None,
    },
    AliasRule {
        canonical: "赤松",
        aliases: &["Pinus densiflora", "Japanese red pine"],
        category: None,
    },
    AliasRule {
        canonical: "湿地松",
        aliases: &["Pinus elliottii", "slash pine"],
        category: None,
    },
    AliasRule {
        canonical: "花绒寄甲",
        aliases: &["Dastarcus helophoroides", "D. helophoroides"],
        category: None,
    },
    AliasRule {
        canonical: "甲维盐",
        aliases: &["emamectin benzoate", "甲氨基阿维菌素苯甲酸盐"],
        category: Some("chemical"),
    },
    AliasRule {
        canonical: "噻虫啉",
        aliases: &["thiacloprid"],
        category: Some("chemical"),
    },
];

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,!?;:'"()\[\]（）【】、，。；：！？“”‘’]"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Lookup key: lowercase, punctuation removed, whitespace collapsed.
pub fn normalize_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, " ");
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

struct BuiltinEntry {
    canonical: String,
    category: Option<String>,
}

/// Deterministic, rule-based name resolution run before any clustering.
pub struct CanonicalResolver {
    builtin: HashMap<String, BuiltinEntry>,
    /// Registered at runtime; consulted before the built-in table.
    custom: HashMap<String, String>,
}

impl CanonicalResolver {
    /// A resolver loaded with [`BUILTIN_ALIASES`].
    pub fn new() -> Self {
        Self::with_rules(BUILTIN_ALIASES)
    }

    /// A resolver with no rules: every name resolves to itself.
    pub fn empty() -> Self {
        Self::with_rules(&[])
    }

    pub fn with_rules(rules: &[AliasRule]) -> Self {
        let mut builtin = HashMap::new();
        for rule in rules {
            let names = std::iter::once(rule.canonical).chain(rule.aliases.iter().copied());
            for name in names {
                // First rule to claim a key keeps it.
                builtin.entry(normalize_key(name)).or_insert_with(|| BuiltinEntry {
                    canonical: rule.canonical.to_string(),
                    category: rule.category.map(str::to_string),
                });
            }
        }

        Self {
            builtin,
            custom: HashMap::new(),
        }
    }

    /// Map `alias` to `canonical`, overriding any built-in rule for `alias`.
    ///
    /// The target is resolved first, so chains collapse to one hop and a
    /// pair that would form a cycle is ignored.
    pub fn register_alias(&mut self, alias: &str, canonical: &str) {
        let alias_key = normalize_key(alias);
        let target = self.resolve(canonical, None);

        if normalize_key(&target) == alias_key {
            return;
        }

        for existing in self.custom.values_mut() {
            if normalize_key(existing) == alias_key {
                *existing = target.clone();
            }
        }
        self.custom.insert(alias_key, target);
    }

    /// Resolve one name. Falls back to the input unchanged when no rule
    /// matches.
    pub fn resolve(&self, name: &str, category_hint: Option<&str>) -> String {
        self.lookup(name, category_hint)
            .unwrap_or_else(|| name.to_string())
    }

    fn lookup(&self, name: &str, category_hint: Option<&str>) -> Option<String> {
        let key = normalize_key(name);

        if let Some(canonical) = self.custom.get(&key) {
            return Some(canonical.clone());
        }

        let entry = self.builtin.get(&key)?;
        let applies = match (&entry.category, category_hint) {
            (Some(rule_category), Some(hint)) => rule_category.eq_ignore_ascii_case(hint.trim()),
            _ => true,
        };
        applies.then(|| entry.canonical.clone())
    }

    /// Resolve a batch of names into a mapping.
    ///
    /// Beyond [`resolve`](Self::resolve), names that differ only in case,
    /// punctuation or spacing are unified: a rule's canonical spelling wins,
    /// otherwise the lexicographically smallest variant.
    pub fn batch_resolve<'a, I>(&self, names: I) -> ConceptMapping
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolved: BTreeMap<String, (String, bool)> = BTreeMap::new();
        for name in names {
            if resolved.contains_key(name) {
                continue;
            }
            let (target, from_rule) = match self.lookup(name, None) {
                Some(canonical) => (canonical, true),
                None => (name.to_string(), false),
            };
            resolved.insert(name.to_string(), (target, from_rule));
        }

        // Representative spelling per normalized key.
        let mut representatives: BTreeMap<String, (bool, String)> = BTreeMap::new();
        for (target, from_rule) in resolved.values() {
            let key = normalize_key(target);
            let candidate = (*from_rule, target.clone());
            let replace = representatives
                .get(&key)
                .is_none_or(|current| prefer(&candidate, current));
            if replace {
                representatives.insert(key, candidate);
            }
        }

        resolved
            .into_iter()
            .map(|(name, (target, _))| {
                let canonical = representatives
                    .get(&normalize_key(&target))
                    .map(|(_, spelling)| spelling.clone())
                    .unwrap_or(target);
                (name, canonical)
            })
            .collect()
    }
}

impl Default for CanonicalResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Rule-derived spellings beat free-form ones; then smallest string.
fn prefer(candidate: &(bool, String), current: &(bool, String)) -> bool {
    match (candidate.0, current.0) {
        (true, false) => true,
        (false, true) => false,
        _ => candidate.1 < current.1,
    }
}
