//! Product of several analyses that share one call stack.
//!
//! Component 0 is always the [`LocationCpa`](super::location::LocationCpa);
//! the stop and merge operators rely on it to tell program locations apart.

use std::fmt::{self, Debug, Display, Formatter};
use std::iter;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use super::location::LocationElement;
use super::{
    AbstractDomain, ConfigurableProgramAnalysis, DynCpa, ElementRef, ElementWithLocation, MergeOperator, PrecisionRef,
    StopOperator, Strengthened, TransferRelation,
};
use crate::cfa::{CfaEdge, EdgeKind, NodeId};
use crate::error::Result;
use crate::options::{parse_bool, FromProperties};

struct Frame {
    function: String,
    call_site: NodeId,
    depth: usize,
    caller: CallStack,
}

/// Persistent stack of active calls; the empty stack is the context of the
/// entry function.
#[derive(Clone, Default)]
pub struct CallStack(Option<Rc<Frame>>);

impl CallStack {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn depth(&self) -> usize {
        self.0.as_ref().map_or(0, |frame| frame.depth)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn push(&self, function: &str, call_site: NodeId) -> CallStack {
        CallStack(Some(Rc::new(Frame {
            function: function.to_string(),
            call_site,
            depth: self.depth() + 1,
            caller: self.clone(),
        })))
    }

    /// The stack without its innermost frame, or `None` if it is empty.
    pub fn pop(&self) -> Option<CallStack> {
        self.0.as_ref().map(|frame| frame.caller.clone())
    }

    /// Innermost frame as `(function, call_site)`.
    pub fn top(&self) -> Option<(&str, NodeId)> {
        self.0.as_deref().map(|frame| (frame.function.as_str(), frame.call_site))
    }

    /// Frames from the innermost outwards.
    pub fn frames(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        iter::successors(self.0.as_deref(), |frame| frame.caller.0.as_deref())
            .map(|frame| (frame.function.as_str(), frame.call_site))
    }

    /// Same depth and the same `(function, call_site)` at every level.
    pub fn stacks_context_equal(&self, other: &CallStack) -> bool {
        let (mut a, mut b) = (self, other);
        if a.depth() != b.depth() {
            return false;
        }
        loop {
            match (&a.0, &b.0) {
                (None, None) => return true,
                (Some(x), Some(y)) if Rc::ptr_eq(x, y) => return true,
                (Some(x), Some(y)) => {
                    if x.function != y.function || x.call_site != y.call_site {
                        return false;
                    }
                    a = &x.caller;
                    b = &y.caller;
                }
                _ => return false,
            }
        }
    }
}

impl PartialEq for CallStack {
    fn eq(&self, other: &Self) -> bool {
        self.stacks_context_equal(other)
    }
}

impl Eq for CallStack {}

impl Debug for CallStack {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.frames().map(|(function, site)| format!("{}@{}", function, site)))
            .finish()
    }
}

/// One element per component plus the shared call stack.
#[derive(Debug, Clone)]
pub struct CompositeElement {
    elements: Vec<ElementRef>,
    call_stack: CallStack,
}

impl CompositeElement {
    pub fn new(elements: Vec<ElementRef>, call_stack: CallStack) -> Self {
        Self { elements, call_stack }
    }

    pub fn elements(&self) -> &[ElementRef] {
        &self.elements
    }

    pub fn get(&self, index: usize) -> &ElementRef {
        &self.elements[index]
    }

    /// The element of the first component of type `E`.
    pub fn component<E: 'static>(&self) -> Option<&E> {
        super::find_sibling(&self.elements)
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl ElementWithLocation for CompositeElement {
    fn location(&self) -> Option<NodeId> {
        self.elements
            .first()
            .and_then(|e| e.as_any().downcast_ref::<LocationElement>())
            .and_then(|l| l.node())
    }
}

impl PartialEq for CompositeElement {
    fn eq(&self, other: &Self) -> bool {
        self.call_stack.stacks_context_equal(&other.call_stack)
            && self.elements.len() == other.elements.len()
            && self.elements.iter().zip(&other.elements).all(|(a, b)| a.dyn_eq(b.as_ref()))
    }
}

impl Display for CompositeElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, e) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", e)?;
        }
        write!(f, ")")?;
        if !self.call_stack.is_empty() {
            write!(f, " in {:?}", self.call_stack)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CompositePrecision(pub Vec<PrecisionRef>);

#[derive(Debug, Clone, Default)]
pub struct CompositeOptions {
    /// The reached set is partitioned by location, so the stop operator
    /// does not have to compare the location component.
    pub use_specialized_reached_set: bool,
}

impl FromProperties for CompositeOptions {
    fn set_property(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "cpa.useSpecializedReachedSet" => self.use_specialized_reached_set = parse_bool(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

type Components = Rc<[Box<dyn DynCpa>]>;

pub struct CompositeDomain {
    components: Components,
    bottom: Rc<CompositeElement>,
}

impl CompositeDomain {
    fn new(components: Components) -> Self {
        let bottom = CompositeElement::new(components.iter().map(|c| c.bottom()).collect(), CallStack::new());
        Self {
            components,
            bottom: Rc::new(bottom),
        }
    }

    /// Whether `element` is the canonical bottom.
    pub fn is_canonical_bottom(&self, element: &Rc<CompositeElement>) -> bool {
        Rc::ptr_eq(element, &self.bottom)
    }
}

impl Debug for CompositeDomain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.components.iter().map(|c| c.name())).finish()
    }
}

impl AbstractDomain for CompositeDomain {
    type Element = Rc<CompositeElement>;

    fn bottom(&self) -> Self::Element {
        self.bottom.clone()
    }

    fn top(&self) -> Self::Element {
        let elements = self.components.iter().map(|c| c.top()).collect();
        Rc::new(CompositeElement::new(elements, CallStack::new()))
    }

    fn is_bottom(&self, element: &Self::Element) -> bool {
        self.is_canonical_bottom(element)
            || self
                .components
                .iter()
                .zip(element.elements())
                .any(|(c, e)| c.is_bottom(e.as_ref()))
    }

    fn le(&self, e1: &Self::Element, e2: &Self::Element) -> bool {
        if Rc::ptr_eq(e1, e2) {
            return true;
        }
        e1.call_stack.stacks_context_equal(&e2.call_stack)
            && self
                .components
                .iter()
                .enumerate()
                .all(|(i, c)| c.le(e1.get(i).as_ref(), e2.get(i).as_ref()))
    }

    /// Component-wise join; the call stack of `e2` is kept.
    fn join(&self, e1: &Self::Element, e2: &Self::Element) -> Self::Element {
        let elements = self
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| c.join(e1.get(i).as_ref(), e2.get(i).as_ref()))
            .collect();
        Rc::new(CompositeElement::new(elements, e2.call_stack.clone()))
    }
}

static NUM_OPERATIONS: AtomicU64 = AtomicU64::new(0);

/// Number of pairwise composite stop checks performed by this process.
pub fn num_operations() -> u64 {
    NUM_OPERATIONS.load(Ordering::Relaxed)
}

#[derive(Debug)]
pub struct CompositeStopOperator {
    domain: Rc<CompositeDomain>,
    first: usize,
}

impl CompositeStopOperator {
    fn new(domain: Rc<CompositeDomain>, options: &CompositeOptions) -> Self {
        let first = if options.use_specialized_reached_set { 1 } else { 0 };
        Self { domain, first }
    }

    fn checked_components(&self) -> impl Iterator<Item = (usize, &dyn DynCpa)> + '_ {
        self.domain
            .components
            .iter()
            .enumerate()
            .skip(self.first)
            .map(|(i, c)| (i, c.as_ref()))
    }
}

impl StopOperator<Rc<CompositeElement>> for CompositeStopOperator {
    fn stop(&self, element: &Rc<CompositeElement>, reached: &[Rc<CompositeElement>]) -> Result<bool> {
        if self.domain.is_canonical_bottom(element) {
            return Ok(true);
        }
        for (i, c) in self.checked_components() {
            if c.is_bottom(element.get(i).as_ref()) {
                trace!("Component {} of {} is bottom", c.name(), element);
                return Ok(true);
            }
        }
        for r in reached {
            if self.stop_pair(element, r)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn stop_pair(&self, element: &Rc<CompositeElement>, reached: &Rc<CompositeElement>) -> Result<bool> {
        NUM_OPERATIONS.fetch_add(1, Ordering::Relaxed);

        if !element.call_stack.stacks_context_equal(&reached.call_stack) {
            return Ok(false);
        }
        assert_eq!(
            element.location(),
            reached.location(),
            "Covering check between elements at different locations: {} and {}",
            element,
            reached
        );
        debug_assert_eq!(element.len(), reached.len());

        for (i, c) in self.checked_components() {
            if !c.stop_pair(element.get(i).as_ref(), reached.get(i).as_ref())? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug)]
pub struct CompositeMergeOperator {
    domain: Rc<CompositeDomain>,
}

impl MergeOperator<Rc<CompositeElement>, CompositePrecision> for CompositeMergeOperator {
    fn merge(
        &self,
        element: &Rc<CompositeElement>,
        reached: &Rc<CompositeElement>,
        precision: &CompositePrecision,
    ) -> Result<Rc<CompositeElement>> {
        if element.location() != reached.location() || !element.call_stack.stacks_context_equal(&reached.call_stack) {
            return Ok(reached.clone());
        }

        let mut changed = false;
        let mut merged = Vec::with_capacity(reached.len());
        for (i, c) in self.domain.components.iter().enumerate() {
            let old = reached.get(i);
            let m = c.merge(element.get(i).as_ref(), old, precision.0[i].as_ref())?;
            changed |= !Rc::ptr_eq(&m, old);
            merged.push(m);
        }

        if changed {
            Ok(Rc::new(CompositeElement::new(merged, reached.call_stack.clone())))
        } else {
            Ok(reached.clone())
        }
    }
}

#[derive(Debug)]
pub struct CompositeTransferRelation {
    domain: Rc<CompositeDomain>,
}

impl CompositeTransferRelation {
    fn next_call_stack(&self, element: &CompositeElement, edge: &CfaEdge) -> Option<CallStack> {
        match &edge.kind {
            EdgeKind::FunctionCall {
                function, call_site, ..
            } => Some(element.call_stack.push(function, *call_site)),
            EdgeKind::FunctionReturn {
                function, call_site, ..
            } => match element.call_stack.top() {
                Some((f, site)) if f == function.as_str() && site == *call_site => element.call_stack.pop(),
                _ => None,
            },
            _ => Some(element.call_stack.clone()),
        }
    }
}

impl TransferRelation<Rc<CompositeElement>, CompositePrecision> for CompositeTransferRelation {
    fn successors(
        &self,
        element: &Rc<CompositeElement>,
        precision: &CompositePrecision,
        edge: &CfaEdge,
    ) -> Result<Vec<Rc<CompositeElement>>> {
        let components = &self.domain.components;

        let call_stack = match self.next_call_stack(element, edge) {
            Some(stack) => stack,
            None => {
                trace!("Return edge {} does not match call stack {:?}", edge, element.call_stack);
                return Ok(Vec::new());
            }
        };

        let mut product: Vec<Vec<ElementRef>> = vec![Vec::with_capacity(components.len())];
        for (i, c) in components.iter().enumerate() {
            let successors = c.successors(element.get(i).as_ref(), precision.0[i].as_ref(), edge)?;
            if successors.is_empty() {
                trace!("{}: {} is infeasible", c.name(), edge);
                return Ok(Vec::new());
            }
            let mut next = Vec::with_capacity(product.len() * successors.len());
            for tuple in &product {
                for s in &successors {
                    let mut tuple = tuple.clone();
                    tuple.push(s.clone());
                    next.push(tuple);
                }
            }
            product = next;
        }

        let mut result = Vec::with_capacity(product.len());
        'tuples: for tuple in product {
            let mut strengthened = tuple.clone();
            for (i, c) in components.iter().enumerate() {
                match c.strengthen(tuple[i].as_ref(), &tuple, edge, precision.0[i].as_ref())? {
                    Strengthened::Unchanged => {}
                    Strengthened::Replaced(e) => strengthened[i] = e,
                    Strengthened::Infeasible => {
                        trace!("{}: strengthening made {} infeasible", c.name(), edge);
                        continue 'tuples;
                    }
                }
            }
            result.push(Rc::new(CompositeElement::new(strengthened, call_stack.clone())));
        }
        Ok(result)
    }
}

/// Product analysis over a location component followed by any number of
/// peers.
#[derive(Debug)]
pub struct CompositeCpa {
    domain: Rc<CompositeDomain>,
    transfer: CompositeTransferRelation,
    merge: CompositeMergeOperator,
    stop: CompositeStopOperator,
    options: CompositeOptions,
}

impl CompositeCpa {
    pub fn new(components: Vec<Box<dyn DynCpa>>, options: CompositeOptions) -> Self {
        assert!(!components.is_empty(), "A composite analysis needs at least one component");
        assert!(
            components[0].bottom().as_any().is::<LocationElement>(),
            "The first component must track locations, found `{}`",
            components[0].name()
        );

        let domain = Rc::new(CompositeDomain::new(components.into()));
        Self {
            transfer: CompositeTransferRelation { domain: domain.clone() },
            merge: CompositeMergeOperator { domain: domain.clone() },
            stop: CompositeStopOperator::new(domain.clone(), &options),
            domain,
            options,
        }
    }

    pub fn components(&self) -> &[Box<dyn DynCpa>] {
        &self.domain.components
    }

    pub fn options(&self) -> &CompositeOptions {
        &self.options
    }

    pub fn composite_domain(&self) -> &CompositeDomain {
        &self.domain
    }
}

impl ConfigurableProgramAnalysis for CompositeCpa {
    type Element = Rc<CompositeElement>;
    type Precision = CompositePrecision;

    fn name(&self) -> &'static str {
        "composite"
    }

    fn domain(&self) -> &dyn AbstractDomain<Element = Rc<CompositeElement>> {
        self.domain.as_ref()
    }

    fn transfer_relation(&self) -> &dyn TransferRelation<Rc<CompositeElement>, CompositePrecision> {
        &self.transfer
    }

    fn merge_operator(&self) -> &dyn MergeOperator<Rc<CompositeElement>, CompositePrecision> {
        &self.merge
    }

    fn stop_operator(&self) -> &dyn StopOperator<Rc<CompositeElement>> {
        &self.stop
    }

    fn initial_element(&self, node: NodeId) -> Rc<CompositeElement> {
        let elements = self.components().iter().map(|c| c.initial_element(node)).collect();
        Rc::new(CompositeElement::new(elements, CallStack::new()))
    }

    fn initial_precision(&self, node: NodeId) -> CompositePrecision {
        CompositePrecision(self.components().iter().map(|c| c.initial_precision(node)).collect())
    }
}
