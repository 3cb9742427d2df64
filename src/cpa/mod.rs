//! Configurable program analyses.
//!
//! A CPA bundles an abstract domain with a transfer relation, a merge
//! operator and a stop operator. Components are written against the typed
//! traits below; [`erase`] turns them into [`DynCpa`] objects so that a
//! [`CompositeCpa`](composite::CompositeCpa) can hold any mix of them.

use std::any::{type_name, Any};
use std::fmt::Debug;
use std::rc::Rc;

use crate::cfa::{CfaEdge, NodeId};
use crate::error::Result;

pub mod algorithm;
pub mod composite;
pub mod explicit;
pub mod location;
pub mod sign;

/// Lattice of abstract elements.
///
/// Implementations must satisfy the usual lattice laws:
/// - `le` is a partial order with `bottom()` as least element,
/// - `join(a, b)` is an upper bound of `a` and `b`.
pub trait AbstractDomain {
    type Element;

    fn bottom(&self) -> Self::Element;

    fn top(&self) -> Self::Element;

    fn is_bottom(&self, element: &Self::Element) -> bool;

    /// Partial order: `e1 ⊑ e2`.
    fn le(&self, e1: &Self::Element, e2: &Self::Element) -> bool;

    fn join(&self, e1: &Self::Element, e2: &Self::Element) -> Self::Element;

    fn eq(&self, e1: &Self::Element, e2: &Self::Element) -> bool {
        self.le(e1, e2) && self.le(e2, e1)
    }
}

/// Result of the strengthening pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strengthened<E> {
    Unchanged,
    Replaced(E),
    /// The element contradicts its siblings.
    Infeasible,
}

impl<E> Strengthened<E> {
    pub fn map<F, T>(self, f: F) -> Strengthened<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Strengthened::Unchanged => Strengthened::Unchanged,
            Strengthened::Replaced(e) => Strengthened::Replaced(f(e)),
            Strengthened::Infeasible => Strengthened::Infeasible,
        }
    }
}

pub trait TransferRelation<E, P> {
    /// Abstract successors of `element` along `edge`.
    ///
    /// An empty result means the edge is infeasible from `element`.
    fn successors(&self, element: &E, precision: &P, edge: &CfaEdge) -> Result<Vec<E>>;

    /// Refine a freshly computed `element` using the elements the other
    /// components computed for the same edge.
    fn strengthen(
        &self,
        _element: &E,
        _siblings: &[ElementRef],
        _edge: &CfaEdge,
        _precision: &P,
    ) -> Result<Strengthened<E>> {
        Ok(Strengthened::Unchanged)
    }
}

pub trait MergeOperator<E, P> {
    /// Combine `element` into `reached`. Returning `reached` keeps both apart.
    fn merge(&self, element: &E, reached: &E, precision: &P) -> Result<E>;
}

pub trait StopOperator<E> {
    /// Check whether `reached` covers `element`.
    fn stop_pair(&self, element: &E, reached: &E) -> Result<bool>;

    /// Check whether any of `reached` covers `element`.
    fn stop(&self, element: &E, reached: &[E]) -> Result<bool> {
        for r in reached {
            if self.stop_pair(element, r)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub trait ConfigurableProgramAnalysis {
    type Element: Clone + Debug + PartialEq + 'static;
    type Precision: Clone + Debug + 'static;

    fn name(&self) -> &'static str;

    fn domain(&self) -> &dyn AbstractDomain<Element = Self::Element>;

    fn transfer_relation(&self) -> &dyn TransferRelation<Self::Element, Self::Precision>;

    fn merge_operator(&self) -> &dyn MergeOperator<Self::Element, Self::Precision>;

    fn stop_operator(&self) -> &dyn StopOperator<Self::Element>;

    fn initial_element(&self, node: NodeId) -> Self::Element;

    fn initial_precision(&self, node: NodeId) -> Self::Precision;
}

/// Elements that know their program location.
pub trait ElementWithLocation {
    fn location(&self) -> Option<NodeId>;
}

impl<T: ElementWithLocation + ?Sized> ElementWithLocation for Rc<T> {
    fn location(&self) -> Option<NodeId> {
        (**self).location()
    }
}

/// Never merges.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeSep;

impl<E: Clone, P> MergeOperator<E, P> for MergeSep {
    fn merge(&self, _element: &E, reached: &E, _precision: &P) -> Result<E> {
        Ok(reached.clone())
    }
}

/// Merges by the join of the domain.
#[derive(Debug, Clone, Default)]
pub struct MergeJoin<D>(pub D);

impl<D, P> MergeOperator<D::Element, P> for MergeJoin<D>
where
    D: AbstractDomain,
{
    fn merge(&self, element: &D::Element, reached: &D::Element, _precision: &P) -> Result<D::Element> {
        Ok(self.0.join(element, reached))
    }
}

/// Covers by the partial order of the domain.
#[derive(Debug, Clone, Default)]
pub struct StopSep<D>(pub D);

impl<D> StopOperator<D::Element> for StopSep<D>
where
    D: AbstractDomain,
{
    fn stop_pair(&self, element: &D::Element, reached: &D::Element) -> Result<bool> {
        Ok(self.0.le(element, reached))
    }
}

// Type erasure

/// Abstract element of any component.
pub trait AbstractElement: Debug {
    fn as_any(&self) -> &dyn Any;

    fn dyn_eq(&self, other: &dyn AbstractElement) -> bool;
}

impl<T: Any + Debug + PartialEq> AbstractElement for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn AbstractElement) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => self == other,
            None => false,
        }
    }
}

pub type ElementRef = Rc<dyn AbstractElement>;
pub type PrecisionRef = Rc<dyn Any>;

/// The first sibling of type `E`, if any.
pub fn find_sibling<E: 'static>(siblings: &[ElementRef]) -> Option<&E> {
    siblings.iter().find_map(|e| e.as_any().downcast_ref::<E>())
}

fn downcast<E: 'static>(element: &dyn AbstractElement) -> &E {
    match element.as_any().downcast_ref::<E>() {
        Some(e) => e,
        None => panic!("{:?} is not an element of type {}", element, type_name::<E>()),
    }
}

fn downcast_precision<P: 'static>(precision: &dyn Any) -> &P {
    match precision.downcast_ref::<P>() {
        Some(p) => p,
        None => panic!("Precision is not of type {}", type_name::<P>()),
    }
}

/// A [`ConfigurableProgramAnalysis`] with erased element and precision types.
///
/// Passing an element of another component is a contract violation and
/// panics.
pub trait DynCpa {
    fn name(&self) -> &'static str;

    fn bottom(&self) -> ElementRef;

    fn top(&self) -> ElementRef;

    fn is_bottom(&self, element: &dyn AbstractElement) -> bool;

    fn le(&self, e1: &dyn AbstractElement, e2: &dyn AbstractElement) -> bool;

    fn join(&self, e1: &dyn AbstractElement, e2: &dyn AbstractElement) -> ElementRef;

    fn initial_element(&self, node: NodeId) -> ElementRef;

    fn initial_precision(&self, node: NodeId) -> PrecisionRef;

    fn successors(&self, element: &dyn AbstractElement, precision: &dyn Any, edge: &CfaEdge) -> Result<Vec<ElementRef>>;

    fn strengthen(
        &self,
        element: &dyn AbstractElement,
        siblings: &[ElementRef],
        edge: &CfaEdge,
        precision: &dyn Any,
    ) -> Result<Strengthened<ElementRef>>;

    /// Merge `element` into `reached`; returns `reached` itself if the
    /// component did not change it.
    fn merge(&self, element: &dyn AbstractElement, reached: &ElementRef, precision: &dyn Any) -> Result<ElementRef>;

    fn stop_pair(&self, element: &dyn AbstractElement, reached: &dyn AbstractElement) -> Result<bool>;
}

struct Erased<C>(C);

/// Erase the element and precision types of `cpa`.
pub fn erase<C>(cpa: C) -> Box<dyn DynCpa>
where
    C: ConfigurableProgramAnalysis + 'static,
{
    Box::new(Erased(cpa))
}

impl<C> DynCpa for Erased<C>
where
    C: ConfigurableProgramAnalysis,
{
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn bottom(&self) -> ElementRef {
        Rc::new(self.0.domain().bottom())
    }

    fn top(&self) -> ElementRef {
        Rc::new(self.0.domain().top())
    }

    fn is_bottom(&self, element: &dyn AbstractElement) -> bool {
        self.0.domain().is_bottom(downcast::<C::Element>(element))
    }

    fn le(&self, e1: &dyn AbstractElement, e2: &dyn AbstractElement) -> bool {
        self.0.domain().le(downcast(e1), downcast(e2))
    }

    fn join(&self, e1: &dyn AbstractElement, e2: &dyn AbstractElement) -> ElementRef {
        Rc::new(self.0.domain().join(downcast::<C::Element>(e1), downcast(e2)))
    }

    fn initial_element(&self, node: NodeId) -> ElementRef {
        Rc::new(self.0.initial_element(node))
    }

    fn initial_precision(&self, node: NodeId) -> PrecisionRef {
        Rc::new(self.0.initial_precision(node))
    }

    fn successors(
        &self,
        element: &dyn AbstractElement,
        precision: &dyn Any,
        edge: &CfaEdge,
    ) -> Result<Vec<ElementRef>> {
        let successors = self.0.transfer_relation().successors(
            downcast::<C::Element>(element),
            downcast_precision::<C::Precision>(precision),
            edge,
        )?;
        Ok(successors.into_iter().map(|e| Rc::new(e) as ElementRef).collect())
    }

    fn strengthen(
        &self,
        element: &dyn AbstractElement,
        siblings: &[ElementRef],
        edge: &CfaEdge,
        precision: &dyn Any,
    ) -> Result<Strengthened<ElementRef>> {
        let result = self.0.transfer_relation().strengthen(
            downcast::<C::Element>(element),
            siblings,
            edge,
            downcast_precision::<C::Precision>(precision),
        )?;
        Ok(result.map(|e| Rc::new(e) as ElementRef))
    }

    fn merge(&self, element: &dyn AbstractElement, reached: &ElementRef, precision: &dyn Any) -> Result<ElementRef> {
        let old = downcast::<C::Element>(reached.as_ref());
        let merged = self.0.merge_operator().merge(
            downcast::<C::Element>(element),
            old,
            downcast_precision::<C::Precision>(precision),
        )?;
        if &merged == old {
            Ok(reached.clone())
        } else {
            Ok(Rc::new(merged))
        }
    }

    fn stop_pair(&self, element: &dyn AbstractElement, reached: &dyn AbstractElement) -> Result<bool> {
        self.0.stop_operator().stop_pair(downcast(element), downcast(reached))
    }
}

/// Marker for CPAs whose precision carries no information.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SingletonPrecision;
