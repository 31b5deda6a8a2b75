/// A relation-prefixed method such as `__get__invoices`, used for
/// operations on a related collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelatedMethod<'a> {
    pub verb: &'a str,
    pub relation: &'a str,
}

const MARKER: &str = "__";

/// Split `__<verb>__<relation>`. Anything else is a plain method.
pub fn parse_related(method: &str) -> Option<RelatedMethod<'_>> {
    let rest = method.strip_prefix(MARKER)?;
    let (verb, relation) = rest.split_once(MARKER)?;
    if verb.is_empty() || relation.is_empty() {
        return None;
    }
    Some(RelatedMethod { verb, relation })
}
