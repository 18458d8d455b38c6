//! Normalised linear constraints `sum a_i * x_i + c <> 0`. Constraints are
//! parsed out of relation atoms by a recursive walk of the arithmetic term;
//! anything outside the linear fragment makes the parse fail, which the
//! plugin treats as "not mine".

use num_rational::BigRational;
use num_traits::Signed;
use num_traits::Zero;

use crate::engine::clauses::Literal;
use crate::engine::trail::Trail;
use crate::engine::variables::Variable;
use crate::engine::variables::VariableDatabase;
use crate::sable_assert_moderate;
use crate::sable_assert_simple;
use crate::terms::Sort;
use crate::terms::Term;
use crate::terms::TermData;
use crate::terms::TermDatabase;

/// Relation kind of a linear constraint. Parsing normalises constraints so
/// that only `Gt`, `Geq`, `Equal` and `Distinct` are ever stored; the other
/// kinds appear transiently while deriving bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConstraintKind {
    Gt,
    Geq,
    Lt,
    Leq,
    Equal,
    Distinct,
}

impl ConstraintKind {
    /// The kind of the negated constraint.
    pub(crate) fn negate(self) -> ConstraintKind {
        match self {
            ConstraintKind::Gt => ConstraintKind::Leq,
            ConstraintKind::Geq => ConstraintKind::Lt,
            ConstraintKind::Lt => ConstraintKind::Geq,
            ConstraintKind::Leq => ConstraintKind::Gt,
            ConstraintKind::Equal => ConstraintKind::Distinct,
            ConstraintKind::Distinct => ConstraintKind::Equal,
        }
    }

    /// The kind after multiplying the constraint through by a negative
    /// constant.
    pub(crate) fn flip(self) -> ConstraintKind {
        match self {
            ConstraintKind::Gt => ConstraintKind::Lt,
            ConstraintKind::Geq => ConstraintKind::Leq,
            ConstraintKind::Lt => ConstraintKind::Gt,
            ConstraintKind::Leq => ConstraintKind::Geq,
            ConstraintKind::Equal | ConstraintKind::Distinct => self,
        }
    }
}

/// A normalised linear constraint: a variable/coefficient vector sorted by
/// variable id, with the constant term keyed by the null variable (which
/// sorts last), and a relation kind against zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinearConstraint {
    coefficients: Vec<(Variable, BigRational)>,
    kind: ConstraintKind,
}

impl LinearConstraint {
    pub(crate) fn kind(&self) -> ConstraintKind {
        self.kind
    }

    /// The non-constant variables of the constraint.
    pub(crate) fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.coefficients
            .iter()
            .filter(|(var, _)| !var.is_null())
            .map(|(var, _)| *var)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (Variable, &BigRational)> + '_ {
        self.coefficients.iter().map(|(var, c)| (*var, c))
    }

    pub(crate) fn coefficient(&self, var: Variable) -> BigRational {
        match self
            .coefficients
            .binary_search_by(|(v, _)| v.cmp(&var))
        {
            Ok(position) => self.coefficients[position].1.clone(),
            Err(_) => BigRational::zero(),
        }
    }

    /// Parse the atom of `literal` into a normalised constraint. `None`
    /// means the atom is outside the linear fragment.
    pub(crate) fn parse(
        literal: Literal,
        terms: &TermDatabase,
        variables: &VariableDatabase,
    ) -> Option<LinearConstraint> {
        let atom = variables.term(literal.variable());

        let (mut kind, lhs, rhs) = match terms.data(atom) {
            TermData::Gt(lhs, rhs) => (ConstraintKind::Gt, *lhs, *rhs),
            TermData::Geq(lhs, rhs) => (ConstraintKind::Geq, *lhs, *rhs),
            TermData::Lt(lhs, rhs) => (ConstraintKind::Lt, *lhs, *rhs),
            TermData::Leq(lhs, rhs) => (ConstraintKind::Leq, *lhs, *rhs),
            TermData::Equal(lhs, rhs) => (ConstraintKind::Equal, *lhs, *rhs),
            _ => return None,
        };
        if !terms.sort(lhs).is_arithmetic() && !terms.sort(rhs).is_arithmetic() {
            return None;
        }

        if literal.is_negated() {
            kind = kind.negate();
        }

        // Strict-less and less-equal are normalised away by multiplying the
        // whole constraint by -1.
        let mut multiplier = BigRational::from_integer(1.into());
        if matches!(kind, ConstraintKind::Lt | ConstraintKind::Leq) {
            multiplier = -multiplier;
            kind = kind.flip();
        }

        let mut coefficients = Vec::new();
        Self::parse_term(lhs, multiplier.clone(), terms, variables, &mut coefficients)?;
        Self::parse_term(rhs, -multiplier, terms, variables, &mut coefficients)?;
        Self::normalize(&mut coefficients);

        Some(LinearConstraint { coefficients, kind })
    }

    fn parse_term(
        term: Term,
        multiplier: BigRational,
        terms: &TermDatabase,
        variables: &VariableDatabase,
        out: &mut Vec<(Variable, BigRational)>,
    ) -> Option<()> {
        match terms.data(term) {
            TermData::Constant(value) => {
                out.push((Variable::null(), &multiplier * value));
                Some(())
            }
            TermData::Variable(sort, _) if sort.is_arithmetic() => {
                let var = variables.variable_of(term)?;
                out.push((var, multiplier));
                Some(())
            }
            TermData::Mult(coefficient, inner) => {
                Self::parse_term(*inner, multiplier * coefficient, terms, variables, out)
            }
            TermData::Plus(parts) => {
                for part in parts {
                    Self::parse_term(*part, multiplier.clone(), terms, variables, out)?;
                }
                Some(())
            }
            TermData::Minus(lhs, rhs) => {
                Self::parse_term(*lhs, multiplier.clone(), terms, variables, out)?;
                Self::parse_term(*rhs, -multiplier, terms, variables, out)
            }
            TermData::UnaryMinus(inner) => {
                Self::parse_term(*inner, -multiplier, terms, variables, out)
            }
            _ => None,
        }
    }

    /// Sort by variable, combine equal variables, and drop terms that
    /// cancelled to zero; a zero constant entry is preserved.
    fn normalize(coefficients: &mut Vec<(Variable, BigRational)>) {
        coefficients.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut combined: Vec<(Variable, BigRational)> = Vec::with_capacity(coefficients.len());
        for (var, coefficient) in coefficients.drain(..) {
            match combined.last_mut() {
                Some((last_var, last_coefficient)) if *last_var == var => {
                    *last_coefficient += coefficient;
                }
                _ => combined.push((var, coefficient)),
            }
        }
        combined.retain(|(var, coefficient)| var.is_null() || !coefficient.is_zero());

        *coefficients = combined;
    }

    /// Evaluate under the trail's model. Returns the truth value and the
    /// maximum decision level of the constraint's variables.
    pub(crate) fn evaluate(&self, trail: &Trail) -> (bool, usize) {
        let mut level = 0;
        let mut sum = BigRational::zero();
        for (var, coefficient) in &self.coefficients {
            if var.is_null() {
                sum += coefficient;
            } else {
                let value = trail
                    .value_of(*var)
                    .and_then(crate::basic_types::Value::as_rational)
                    .expect("evaluation requires all variables assigned");
                level = level.max(trail.variable_decision_level(*var));
                sum += coefficient * value;
            }
        }

        let holds = match self.kind {
            ConstraintKind::Gt => sum.is_positive(),
            ConstraintKind::Geq => !sum.is_negative(),
            ConstraintKind::Lt => sum.is_negative(),
            ConstraintKind::Leq => !sum.is_positive(),
            ConstraintKind::Equal => sum.is_zero(),
            ConstraintKind::Distinct => !sum.is_zero(),
        };
        (holds, level)
    }

    /// Multiply through by a positive constant.
    pub(crate) fn multiply(&mut self, factor: &BigRational) {
        sable_assert_simple!(factor.is_positive());
        for (_, coefficient) in &mut self.coefficients {
            *coefficient *= factor;
        }
    }

    /// Multiply through by -1. Only meaningful for equalities and
    /// disequalities, where the relation is symmetric.
    pub(crate) fn negate_coefficients(&mut self) {
        sable_assert_moderate!(matches!(
            self.kind,
            ConstraintKind::Equal | ConstraintKind::Distinct
        ));
        for (_, coefficient) in &mut self.coefficients {
            *coefficient = -coefficient.clone();
        }
    }

    /// Split a disequality `a*x + t != 0` into the two strict sides
    /// `|a|*x + p > 0` and `-|a|*x - p > 0` (the first has a positive
    /// coefficient on `x`).
    pub(crate) fn split_disequality(&self, x: Variable) -> (LinearConstraint, LinearConstraint) {
        sable_assert_simple!(self.kind == ConstraintKind::Distinct);
        sable_assert_simple!(!self.coefficient(x).is_zero());

        let mut positive = self.clone();
        let mut negative = self.clone();
        if self.coefficient(x).is_negative() {
            positive.negate_coefficients();
        } else {
            negative.negate_coefficients();
        }
        positive.kind = ConstraintKind::Gt;
        negative.kind = ConstraintKind::Gt;
        (positive, negative)
    }

    /// Add `factor * other` to this constraint. The resulting kind is the
    /// weakest implied relation.
    pub(crate) fn add(&mut self, other: &LinearConstraint, factor: &BigRational) {
        sable_assert_simple!(factor.is_positive());

        self.kind = match self.kind {
            ConstraintKind::Equal => other.kind,
            ConstraintKind::Gt => ConstraintKind::Gt,
            ConstraintKind::Geq => {
                if other.kind == ConstraintKind::Gt {
                    ConstraintKind::Gt
                } else {
                    ConstraintKind::Geq
                }
            }
            kind => {
                sable_assert_simple!(false, "cannot add to a constraint of kind {kind:?}");
                kind
            }
        };

        for (var, coefficient) in &other.coefficients {
            self.coefficients.push((*var, factor * coefficient));
        }
        Self::normalize(&mut self.coefficients);
    }

    /// Construct the literal of this constraint, interning the canonical
    /// atom and allocating its variable if needed (which fires new-variable
    /// notifications downstream).
    pub(crate) fn literal(
        &self,
        terms: &mut TermDatabase,
        variables: &mut VariableDatabase,
        level: usize,
    ) -> Literal {
        sable_assert_simple!(!self.coefficients.is_empty());

        let mut parts = Vec::with_capacity(self.coefficients.len());
        for (var, coefficient) in &self.coefficients {
            if var.is_null() {
                parts.push(terms.constant(coefficient.clone()));
            } else {
                let var_term = variables.term(*var);
                parts.push(terms.mult(coefficient.clone(), var_term));
            }
        }
        let sum = if parts.len() == 1 {
            parts[0]
        } else {
            terms.plus(parts)
        };
        let zero = terms.integer_constant(0);

        let (atom, negated) = match self.kind {
            ConstraintKind::Gt => (terms.gt(sum, zero), false),
            ConstraintKind::Geq => (terms.geq(sum, zero), false),
            ConstraintKind::Lt => (terms.lt(sum, zero), false),
            ConstraintKind::Leq => (terms.leq(sum, zero), false),
            ConstraintKind::Equal => (terms.equal(sum, zero), false),
            ConstraintKind::Distinct => (terms.equal(sum, zero), true),
        };

        let var = variables.variable(atom, Sort::Bool, level);
        Literal::new(var, negated)
    }
}
