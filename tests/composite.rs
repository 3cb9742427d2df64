mod common;

use std::rc::Rc;

use common::Context;
use cpa_rs::cfa::{BinaryOp, Cfa, CfaBuilder, Expr, NodeId};
use cpa_rs::cpa::algorithm::CpaAlgorithm;
use cpa_rs::cpa::composite::{CallStack, CompositeCpa, CompositeElement, CompositeOptions};
use cpa_rs::cpa::location::{LocationCpa, LocationElement};
use cpa_rs::cpa::sign::{Sign, SignCpa, SignElement};
use cpa_rs::cpa::{erase, AbstractDomain, ConfigurableProgramAnalysis, ElementRef, StopOperator};
use cpa_rs::predicate::{PredicateCpa, PredicateCpaOptions, PredicateElement, PredicatePrecision};
use test_log::test;

fn straight_line() -> Rc<Cfa> {
    let mut builder = CfaBuilder::new("main");
    let entry = builder.function("main");
    let n1 = builder.node();
    builder.assign(entry, n1, "x", Expr::constant(1));
    Rc::new(builder.build())
}

fn location_and_sign(options: CompositeOptions) -> CompositeCpa {
    CompositeCpa::new(
        vec![erase(LocationCpa::new(straight_line())), erase(SignCpa::default())],
        options,
    )
}

fn element(node: usize, sign: SignElement, stack: CallStack) -> Rc<CompositeElement> {
    let elements: Vec<ElementRef> = vec![Rc::new(LocationElement::At(NodeId(node))), Rc::new(sign)];
    Rc::new(CompositeElement::new(elements, stack))
}

#[test]
fn test_bottom_component_stops_with_empty_reached_set() {
    let cpa = location_and_sign(CompositeOptions::default());
    let e = element(1, SignElement::bottom(), CallStack::new());
    assert!(cpa.stop_operator().stop(&e, &[]).unwrap());
    assert!(cpa.stop_operator().stop(&cpa.domain().bottom(), &[]).unwrap());
}

#[test]
fn test_bottom_component_stops_regardless_of_reached_set() {
    let cpa = location_and_sign(CompositeOptions::default());
    let e = element(1, SignElement::bottom(), CallStack::new());
    let other = element(1, SignElement::top().with("x", Sign::Neg), CallStack::new().push("f", NodeId(0)));
    assert!(cpa.stop_operator().stop(&e, &[other]).unwrap());
}

#[test]
fn test_stack_context_gating() {
    let cpa = location_and_sign(CompositeOptions::default());
    let precise = SignElement::top().with("x", Sign::Pos);

    let in_f = element(1, precise.clone(), CallStack::new().push("f", NodeId(0)));
    let in_g = element(1, SignElement::top(), CallStack::new().push("g", NodeId(0)));
    let in_f_deeper = element(1, SignElement::top(), CallStack::new().push("f", NodeId(0)).push("f", NodeId(2)));
    let in_f_too = element(1, SignElement::top(), CallStack::new().push("f", NodeId(0)));

    let stop = cpa.stop_operator();
    assert!(!stop.stop(&in_f, &[in_g.clone(), in_f_deeper.clone()]).unwrap());
    assert!(!stop.stop_pair(&in_f, &in_g).unwrap());
    assert!(!stop.stop_pair(&in_f, &in_f_deeper).unwrap());
    assert!(stop.stop(&in_f, &[in_g, in_f_deeper, in_f_too]).unwrap());
}

/// ```text
/// x = 5;
/// if (x > 3) { A } else { B }
/// ```
#[test]
fn test_predicate_analysis_prunes_infeasible_block() {
    let ctx = Context::new();
    let mut builder = CfaBuilder::new("main");
    let entry = builder.function("main");
    let n1 = builder.node();
    let a = builder.node();
    let b = builder.node();
    builder.assign(entry, n1, "x", Expr::constant(5));
    builder.branch(n1, a, b, Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::constant(3)));
    builder.loop_head(a).loop_head(b);
    let cfa = Rc::new(builder.build());

    let cpa = CompositeCpa::new(
        vec![
            erase(LocationCpa::new(cfa.clone())),
            erase(SignCpa::default()),
            erase(PredicateCpa::new(
                ctx.boolean(),
                cfa.clone(),
                PredicateCpaOptions::default(),
                PredicatePrecision::new(),
            )),
        ],
        CompositeOptions {
            use_specialized_reached_set: true,
        },
    );
    let algorithm = CpaAlgorithm::new(&cpa, &cfa);
    let mut reached = algorithm.initial_reached_set(true);
    let stats = algorithm.run(&mut reached).unwrap();
    assert!(!stats.incomplete);

    let at_a = reached.at(a);
    assert_eq!(at_a.len(), 1);
    assert!(at_a[0].component::<PredicateElement>().unwrap().is_abstraction_element());
    assert_eq!(at_a[0].component::<SignElement>().unwrap().get("x"), Sign::Pos);

    // The sign domain alone cannot refute x <= 3.
    assert!(reached.at(b).is_empty());
}

/// ```text
/// i = 0;
/// while (i < 10) i = i + 1;
/// ```
#[test]
fn test_predicate_analysis_loop_converges() {
    let ctx = Context::new();
    let mut builder = CfaBuilder::new("main");
    let entry = builder.function("main");
    let head = builder.node();
    let body = builder.node();
    let exit = builder.node();
    builder.assign(entry, head, "i", Expr::constant(0));
    builder.loop_head(head);
    builder.branch(head, body, exit, Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::constant(10)));
    builder.assign(body, head, "i", Expr::binary(BinaryOp::Add, Expr::var("i"), Expr::constant(1)));
    let cfa = Rc::new(builder.build());

    let pamgr = ctx.boolean();
    let non_negative = ctx.greater_than("i", -1);
    let cpa = CompositeCpa::new(
        vec![
            erase(LocationCpa::new(cfa.clone())),
            erase(PredicateCpa::new(
                pamgr.clone(),
                cfa.clone(),
                PredicateCpaOptions::default(),
                PredicatePrecision::global([non_negative.clone()]),
            )),
        ],
        CompositeOptions::default(),
    );
    let algorithm = CpaAlgorithm::new(&cpa, &cfa);
    let mut reached = algorithm.initial_reached_set(false);
    let stats = algorithm.run(&mut reached).unwrap();
    assert!(!stats.incomplete);

    let at_head = reached.at(head);
    assert_eq!(at_head.len(), 1);
    let element = at_head[0].component::<PredicateElement>().unwrap();
    assert_eq!(element.abstraction().unwrap().as_region(), non_negative.abstract_variable());
    assert_eq!(reached.at(exit).len(), 1);
    assert!(pamgr.stats().num_calls_abstraction >= 2);
}
