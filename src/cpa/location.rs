//! Location tracking: the program counter as an abstract domain.

use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use super::{
    AbstractDomain, ConfigurableProgramAnalysis, ElementWithLocation, MergeOperator, MergeSep, SingletonPrecision,
    StopOperator, StopSep, TransferRelation,
};
use crate::cfa::{Cfa, CfaEdge, NodeId};
use crate::error::Result;

/// Flat lattice of program locations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LocationElement {
    Bottom,
    At(NodeId),
    Top,
}

impl LocationElement {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            LocationElement::At(node) => Some(*node),
            _ => None,
        }
    }
}

impl ElementWithLocation for LocationElement {
    fn location(&self) -> Option<NodeId> {
        self.node()
    }
}

impl Display for LocationElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LocationElement::Bottom => write!(f, "⊥"),
            LocationElement::At(node) => write!(f, "{}", node),
            LocationElement::Top => write!(f, "⊤"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocationDomain;

impl AbstractDomain for LocationDomain {
    type Element = LocationElement;

    fn bottom(&self) -> Self::Element {
        LocationElement::Bottom
    }

    fn top(&self) -> Self::Element {
        LocationElement::Top
    }

    fn is_bottom(&self, element: &Self::Element) -> bool {
        *element == LocationElement::Bottom
    }

    fn le(&self, e1: &Self::Element, e2: &Self::Element) -> bool {
        match (e1, e2) {
            (LocationElement::Bottom, _) | (_, LocationElement::Top) => true,
            _ => e1 == e2,
        }
    }

    fn join(&self, e1: &Self::Element, e2: &Self::Element) -> Self::Element {
        match (e1, e2) {
            (LocationElement::Bottom, e) | (e, LocationElement::Bottom) => *e,
            _ if e1 == e2 => *e1,
            _ => LocationElement::Top,
        }
    }
}

#[derive(Debug)]
struct LocationTransferRelation;

impl TransferRelation<LocationElement, SingletonPrecision> for LocationTransferRelation {
    fn successors(
        &self,
        element: &LocationElement,
        _precision: &SingletonPrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<LocationElement>> {
        match element {
            LocationElement::At(node) if *node == edge.from => Ok(vec![LocationElement::At(edge.to)]),
            LocationElement::Top => Ok(vec![LocationElement::At(edge.to)]),
            _ => Ok(Vec::new()),
        }
    }
}

/// Follows the edges of a [`Cfa`].
#[derive(Debug)]
pub struct LocationCpa {
    cfa: Rc<Cfa>,
    transfer: LocationTransferRelation,
    stop: StopSep<LocationDomain>,
}

impl LocationCpa {
    pub fn new(cfa: Rc<Cfa>) -> Self {
        Self {
            cfa,
            transfer: LocationTransferRelation,
            stop: StopSep(LocationDomain),
        }
    }

    pub fn cfa(&self) -> &Cfa {
        &self.cfa
    }
}

impl ConfigurableProgramAnalysis for LocationCpa {
    type Element = LocationElement;
    type Precision = SingletonPrecision;

    fn name(&self) -> &'static str {
        "location"
    }

    fn domain(&self) -> &dyn AbstractDomain<Element = LocationElement> {
        &LocationDomain
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<LocationElement, SingletonPrecision> {
        &self.transfer
    }

    fn merge_operator(&self) -> &dyn MergeOperator<LocationElement, SingletonPrecision> {
        &MergeSep
    }

    fn stop_operator(&self) -> &dyn StopOperator<LocationElement> {
        &self.stop
    }

    fn initial_element(&self, node: NodeId) -> LocationElement {
        LocationElement::At(node)
    }

    fn initial_precision(&self, _node: NodeId) -> SingletonPrecision {
        SingletonPrecision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::{CfaBuilder, Expr};
    use test_log::test;

    #[test]
    fn test_lattice() {
        let d = LocationDomain;
        let a = LocationElement::At(NodeId(1));
        let b = LocationElement::At(NodeId(2));

        assert!(d.le(&d.bottom(), &a));
        assert!(d.le(&a, &d.top()));
        assert!(!d.le(&a, &b));
        assert_eq!(d.join(&a, &a), a);
        assert_eq!(d.join(&a, &d.bottom()), a);
        assert_eq!(d.join(&a, &b), LocationElement::Top);
    }

    #[test]
    fn test_follows_edges() {
        let mut builder = CfaBuilder::new("main");
        let entry = builder.function("main");
        let n1 = builder.node();
        builder.assign(entry, n1, "x", Expr::constant(1));
        let cfa = Rc::new(builder.build());
        let cpa = LocationCpa::new(cfa.clone());

        let init = cpa.initial_element(cfa.entry());
        let edge = &cfa.edges()[0];
        let succ = cpa.transfer_relation().successors(&init, &SingletonPrecision, edge).unwrap();
        assert_eq!(succ, vec![LocationElement::At(n1)]);

        // Not at the source of the edge.
        let succ = cpa
            .transfer_relation()
            .successors(&LocationElement::At(n1), &SingletonPrecision, edge)
            .unwrap();
        assert!(succ.is_empty());
    }
}
