//! The remote collaborator boundary.
//!
//! [`RemoteCollection`] is the transport-agnostic contract a far-side
//! collection must satisfy: queries cross as canonical text, elements as
//! `(id, [(prop_name, raw_bytes)])` pairs, and no type information crosses
//! at all. The far side must hold the same schema to interpret the bytes.
//! [`RemoteGroup`] adapts such a collection back into the local [`Group`]
//! contract.

use crate::element::{Element, Prop, SerializedElement};
use crate::error::Result;
use crate::group::{Group, MemoryGroup};
use crate::query::Query;
use crate::schema::Schema;
use std::sync::Arc;

/// Contract of a far-side collection. Implementations own transport,
/// retries, and timeouts; none of those concerns exist in this crate.
pub trait RemoteCollection: Send + Sync {
    fn find(
        &self,
        context: &str,
        query: &str,
        start: usize,
        amount: usize,
    ) -> Result<Vec<SerializedElement>>;

    fn add(&self, context: &str, elements: Vec<SerializedElement>) -> Result<()>;

    fn remove(&self, context: &str, query: &str) -> Result<()>;

    fn update(&self, context: &str, query: &str, props: Vec<(String, Vec<u8>)>) -> Result<()>;
}

/// A [`Group`] whose inner collection lives behind a [`RemoteCollection`].
pub struct RemoteGroup {
    remote: Arc<dyn RemoteCollection>,
    schema: Arc<Schema>,
    context: String,
}

impl RemoteGroup {
    pub fn new(
        remote: Arc<dyn RemoteCollection>,
        schema: Arc<Schema>,
        context: impl Into<String>,
    ) -> Result<Self> {
        let context = context.into();
        schema.context(&context)?;
        Ok(RemoteGroup {
            remote,
            schema,
            context,
        })
    }
}

impl Group for RemoteGroup {
    fn elements(&self) -> Result<Vec<Element>> {
        let wire = self.remote.find(
            &self.context,
            &Query::All.canonical_form(),
            0,
            usize::MAX,
        )?;
        Ok(wire.into_iter().map(Element::from).collect())
    }

    fn add(&self, elements: Vec<Element>) -> Result<()> {
        let wire = elements.iter().map(SerializedElement::from).collect();
        self.remote.add(&self.context, wire)
    }

    fn remove(&self, query: &Query) -> Result<()> {
        self.remote.remove(&self.context, &query.canonical_form())
    }

    fn find(&self, query: &Query, start: usize, amount: usize) -> Result<MemoryGroup> {
        let wire = self
            .remote
            .find(&self.context, &query.canonical_form(), start, amount)?;
        MemoryGroup::with_elements(
            self.schema.clone(),
            self.context.clone(),
            wire.into_iter().map(Element::from).collect(),
        )
    }

    fn update(&self, query: &Query, props: Vec<Prop>) -> Result<()> {
        let wire = props.into_iter().map(|p| (p.name, p.content)).collect();
        self.remote
            .update(&self.context, &query.canonical_form(), wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LodestoreError;
    use pretty_assertions::assert_eq;

    /// Far side of the boundary: holds its own copy of the schema and a
    /// plain in-memory group, and reconstructs queries from canonical text.
    struct FarSide {
        group: MemoryGroup,
    }

    impl RemoteCollection for FarSide {
        fn find(
            &self,
            _context: &str,
            query: &str,
            start: usize,
            amount: usize,
        ) -> Result<Vec<SerializedElement>> {
            let parsed = Query::from_canonical(query)?;
            Ok(self
                .group
                .find(&parsed, start, amount)?
                .elements()?
                .iter()
                .map(SerializedElement::from)
                .collect())
        }

        fn add(&self, _context: &str, elements: Vec<SerializedElement>) -> Result<()> {
            self.group
                .add(elements.into_iter().map(Element::from).collect())
        }

        fn remove(&self, _context: &str, query: &str) -> Result<()> {
            self.group.remove(&Query::from_canonical(query)?)
        }

        fn update(
            &self,
            _context: &str,
            query: &str,
            props: Vec<(String, Vec<u8>)>,
        ) -> Result<()> {
            self.group.update(
                &Query::from_canonical(query)?,
                props.into_iter().map(|(n, c)| Prop::new(n, c)).collect(),
            )
        }
    }

    fn bike_schema() -> Arc<Schema> {
        Arc::new(
            Schema::parse_str(
                r#"
contexts:
  bike:
    attributes:
      Name: { type: text }
      MaxSpeed: { type: integer }
"#,
            )
            .unwrap(),
        )
    }

    fn bike(id: &str, name: &str, speed: i32) -> Element {
        Element::new(
            id,
            vec![Prop::text("Name", name), Prop::integer("MaxSpeed", speed)],
        )
    }

    fn proxied() -> RemoteGroup {
        let schema = bike_schema();
        let far = FarSide {
            group: MemoryGroup::with_elements(
                schema.clone(),
                "bike",
                vec![bike("1", "Viper", 120), bike("2", "Taurus", 95)],
            )
            .unwrap(),
        };
        RemoteGroup::new(Arc::new(far), schema, "bike").unwrap()
    }

    fn ids(group: &MemoryGroup) -> Vec<String> {
        group
            .elements()
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect()
    }

    #[test]
    fn unknown_context_is_rejected_at_construction() {
        let schema = bike_schema();
        let far = FarSide {
            group: MemoryGroup::new(schema.clone(), "bike").unwrap(),
        };
        let result = RemoteGroup::new(Arc::new(far), schema, "car");
        assert!(matches!(result, Err(LodestoreError::UnknownContext { .. })));
    }

    #[test]
    fn queries_survive_the_canonical_round_trip() {
        let proxy = proxied();
        let query = Query::gte("MaxSpeed", "100").and(Query::contains("Name", "ipe"));
        assert_eq!(ids(&proxy.find(&query, 0, usize::MAX).unwrap()), vec!["1"]);
    }

    #[test]
    fn mutations_cross_the_boundary() {
        let proxy = proxied();
        proxy.add(vec![bike("3", "Comet", 140)]).unwrap();
        proxy
            .update(&Query::eq("id", "3"), vec![Prop::integer("MaxSpeed", 150)])
            .unwrap();
        proxy.remove(&Query::eq("id", "1")).unwrap();

        let rest = proxy.elements().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1], bike("3", "Comet", 150));
    }

    #[test]
    fn raw_bytes_cross_unchanged() {
        let proxy = proxied();
        let found = proxy.find(&Query::eq("Name", "Taurus"), 0, usize::MAX).unwrap();
        let elements = found.elements().unwrap();
        assert_eq!(elements[0].prop("MaxSpeed"), Some(95i32.to_le_bytes().as_slice()));
    }
}
