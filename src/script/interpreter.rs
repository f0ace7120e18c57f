//! Tree-walking interpreter.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use super::ast::{BinaryOp, Expr, FnDecl, Stmt, UnaryOp};
use super::value::{Builtin, Value};
use super::{RunOptions, ScriptError};

/// Non-local exits travel on the error path so that `break`, `continue` and
/// `return` work from inside `if` expressions.
enum Unwind {
    Error(ScriptError),
    Return(Value, usize),
    Break(usize),
    Continue(usize),
}

impl From<ScriptError> for Unwind {
    fn from(err: ScriptError) -> Self {
        Self::Error(err)
    }
}

type Exec<T> = Result<T, Unwind>;

fn runtime(line: usize, message: impl Into<String>) -> Unwind {
    Unwind::Error(ScriptError::Runtime {
        line,
        message: message.into(),
    })
}

/// Evaluation context for one script run.
///
/// Variables live in a global scope plus one local scope per active call.
/// Blocks do not open scopes.
pub struct Interpreter<'a> {
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    out: &'a mut dyn Write,
    options: RunOptions,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter writing `print` output to `out`.
    pub fn new(out: &'a mut dyn Write, options: RunOptions) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            out,
            options,
        }
    }

    /// Execute a parsed program and return its final expression value.
    ///
    /// # Errors
    ///
    /// Returns the first [`ScriptError`] raised, including stray
    /// `return`/`break`/`continue` at top level.
    pub fn run(&mut self, program: &[Stmt]) -> Result<Option<Value>, ScriptError> {
        match self.exec_block(program) {
            Ok(value) => Ok(value),
            Err(Unwind::Error(err)) => Err(err),
            Err(Unwind::Return(_, line)) => Err(ScriptError::Runtime {
                line,
                message: "'return' outside function".into(),
            }),
            Err(Unwind::Break(line)) => Err(ScriptError::Runtime {
                line,
                message: "'break' outside loop".into(),
            }),
            Err(Unwind::Continue(line)) => Err(ScriptError::Runtime {
                line,
                message: "'continue' outside loop".into(),
            }),
        }
    }

    fn checkpoint(&self) -> Exec<()> {
        match &self.options.cancel {
            Some(flag) if flag.is_cancelled() => Err(Unwind::Error(ScriptError::Interrupted)),
            _ => Ok(()),
        }
    }

    // ── Statements ───────────────────────────────────────────────────────────

    /// Run statements in order; the result is the value of the last statement
    /// when it is an expression statement.
    fn exec_block(&mut self, stmts: &[Stmt]) -> Exec<Option<Value>> {
        let mut last = None;
        for stmt in stmts {
            last = self.exec(stmt)?;
        }
        Ok(last)
    }

    fn exec(&mut self, stmt: &Stmt) -> Exec<Option<Value>> {
        self.checkpoint()?;
        match stmt {
            Stmt::Expr(expr) => return self.eval(expr).map(Some),
            Stmt::Let { name, value } => {
                let value = self.eval(value)?;
                self.scope_mut().insert(name.clone(), value);
            }
            Stmt::Assign {
                target,
                value,
                line,
            } => {
                let value = self.eval(value)?;
                self.assign(target, value, *line)?;
            }
            Stmt::Fn(decl) => {
                self.scope_mut()
                    .insert(decl.name.clone(), Value::Function(Arc::clone(decl)));
            }
            Stmt::Return { value, line } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                return Err(Unwind::Return(value, *line));
            }
            Stmt::While { cond, body } => loop {
                self.checkpoint()?;
                if !self.eval(cond)?.is_truthy() {
                    break;
                }
                match self.exec_block(body) {
                    Ok(_) | Err(Unwind::Continue(_)) => {}
                    Err(Unwind::Break(_)) => break,
                    Err(other) => return Err(other),
                }
            },
            Stmt::For {
                var,
                iterable,
                body,
                line,
            } => {
                let items = match self.eval(iterable)? {
                    Value::List(items) => items,
                    Value::Map(entries) => entries.into_keys().map(Value::Str).collect(),
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => {
                        return Err(runtime(
                            *line,
                            format!("'{}' is not iterable", other.type_name()),
                        ))
                    }
                };
                for item in items {
                    self.checkpoint()?;
                    self.assign_var(var, item);
                    match self.exec_block(body) {
                        Ok(_) | Err(Unwind::Continue(_)) => {}
                        Err(Unwind::Break(_)) => break,
                        Err(other) => return Err(other),
                    }
                }
            }
            Stmt::Break { line } => return Err(Unwind::Break(*line)),
            Stmt::Continue { line } => return Err(Unwind::Continue(*line)),
        }
        Ok(None)
    }

    fn scope_mut(&mut self) -> &mut HashMap<String, Value> {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .last()
            .and_then(|frame| frame.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        if let Some(frame) = self.frames.last_mut() {
            if frame.contains_key(name) {
                return frame.get_mut(name);
            }
        }
        self.globals.get_mut(name)
    }

    /// Plain assignment updates the nearest existing binding (local, then
    /// global) and otherwise creates one in the current scope.
    fn assign_var(&mut self, name: &str, value: Value) {
        match self.lookup_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.scope_mut().insert(name.to_owned(), value);
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, line: usize) -> Exec<()> {
        let mut path = Vec::new();
        let mut cursor = target;
        while let Expr::Index { target, index, .. } = cursor {
            path.push(index.as_ref());
            cursor = target.as_ref();
        }
        let Expr::Var { name, .. } = cursor else {
            return Err(runtime(line, "cannot assign to expression"));
        };
        if path.is_empty() {
            self.assign_var(name, value);
            return Ok(());
        }

        path.reverse();
        let mut keys = Vec::with_capacity(path.len());
        for index in path {
            keys.push(self.eval(index)?);
        }

        let Some(mut slot) = self.lookup_mut(name) else {
            return Err(runtime(line, format!("name '{name}' is not defined")));
        };
        let (last, parents) = keys.split_last().ok_or_else(|| runtime(line, "empty index path"))?;
        for key in parents {
            slot = index_mut(slot, key, line)?;
        }
        match (slot, last) {
            (Value::Map(entries), Value::Str(key)) => {
                entries.insert(key.clone(), value);
            }
            (Value::List(items), Value::Int(i)) => {
                let idx = resolve_index(*i, items.len(), line)?;
                items[idx] = value;
            }
            (container, key) => {
                return Err(runtime(
                    line,
                    format!(
                        "cannot assign into {} with {} index",
                        container.type_name(),
                        key.type_name()
                    ),
                ))
            }
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(x) => Ok(Value::Float(*x)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(runtime(
                                expr_line(value).unwrap_or(0),
                                format!("map keys must be str, not {}", other.type_name()),
                            ))
                        }
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Var { name, line } => match self.lookup(name) {
                Some(value) => Ok(value.clone()),
                None => Builtin::from_name(name)
                    .map(Value::Builtin)
                    .ok_or_else(|| runtime(*line, format!("name '{name}' is not defined"))),
            },
            Expr::Index {
                target,
                index,
                line,
            } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(&target, &index, *line)
            }
            Expr::Call { callee, args, line } => {
                let callee = self.eval(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(&callee, values, *line)
            }
            Expr::Unary { op, operand, line } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| runtime(*line, "integer overflow")),
                    (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                    (UnaryOp::Neg, other) => Err(runtime(
                        *line,
                        format!("bad operand type for unary -: '{}'", other.type_name()),
                    )),
                }
            }
            Expr::Binary { op, lhs, rhs, line } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, &lhs, &rhs, *line)
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.is_truthy() {
                    self.eval(rhs)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.is_truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if self.eval(cond)?.is_truthy() {
                    Some(then)
                } else {
                    otherwise.as_ref()
                };
                match branch {
                    Some(body) => Ok(self.exec_block(body)?.unwrap_or(Value::Null)),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    fn call(&mut self, callee: &Value, args: Vec<Value>, line: usize) -> Exec<Value> {
        self.checkpoint()?;
        match callee {
            Value::Function(decl) => self.call_function(Arc::clone(decl), args, line),
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, line),
            other => Err(runtime(
                line,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(&mut self, decl: Arc<FnDecl>, args: Vec<Value>, line: usize) -> Exec<Value> {
        if args.len() != decl.params.len() {
            return Err(runtime(
                line,
                format!(
                    "{}() takes {} argument(s) but {} were given",
                    decl.name,
                    decl.params.len(),
                    args.len()
                ),
            ));
        }
        if self.frames.len() >= self.options.max_call_depth {
            return Err(Unwind::Error(ScriptError::CallDepth {
                line,
                limit: self.options.max_call_depth,
            }));
        }

        self.frames
            .push(decl.params.iter().cloned().zip(args).collect());
        let result = self.exec_block(&decl.body);
        self.frames.pop();

        match result {
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(Unwind::Return(value, _)) => Ok(value),
            Err(Unwind::Break(line)) => Err(runtime(line, "'break' outside loop")),
            Err(Unwind::Continue(line)) => Err(runtime(line, "'continue' outside loop")),
            Err(err) => Err(err),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>, line: usize) -> Exec<Value> {
        match builtin {
            Builtin::Print => {
                let mut text = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                text.push('\n');
                self.out
                    .write_all(text.as_bytes())
                    .and_then(|()| self.out.flush())
                    .map_err(|err| runtime(line, format!("print failed: {err}")))?;
                Ok(Value::Null)
            }
            Builtin::Sleep => {
                let [secs] = expect_args::<1>(builtin, args, line)?;
                let secs = as_f64(&secs).ok_or_else(|| {
                    runtime(line, format!("sleep() expects a number, not {}", secs.type_name()))
                })?;
                let duration = Duration::try_from_secs_f64(secs)
                    .map_err(|_| runtime(line, "sleep length must be a non-negative number"))?;
                match &self.options.cancel {
                    Some(flag) => {
                        if flag.sleep(duration) {
                            return Err(Unwind::Error(ScriptError::Interrupted));
                        }
                    }
                    None => std::thread::sleep(duration),
                }
                Ok(Value::Null)
            }
            Builtin::Len => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                let len = match &value {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Map(entries) => entries.len(),
                    other => {
                        return Err(runtime(
                            line,
                            format!("object of type '{}' has no len()", other.type_name()),
                        ))
                    }
                };
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            Builtin::Range => range(args, line),
            Builtin::Str => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                Ok(Value::Str(value.to_string()))
            }
            Builtin::Int => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                to_int(&value, line).map(Value::Int)
            }
            Builtin::Float => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                match &value {
                    Value::Str(s) => s.trim().parse().map(Value::Float).map_err(|_| {
                        runtime(line, format!("could not convert string to float: '{s}'"))
                    }),
                    Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                    other => as_f64(other).map(Value::Float).ok_or_else(|| {
                        runtime(line, format!("float() argument must be a number or str, not {}", other.type_name()))
                    }),
                }
            }
            Builtin::Keys | Builtin::Values => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                let Value::Map(entries) = value else {
                    return Err(runtime(
                        line,
                        format!("{}() expects a map, not {}", builtin.name(), value.type_name()),
                    ));
                };
                Ok(Value::List(if builtin == Builtin::Keys {
                    entries.into_keys().map(Value::Str).collect()
                } else {
                    entries.into_values().collect()
                }))
            }
            Builtin::Append => {
                let [list, item] = expect_args::<2>(builtin, args, line)?;
                let Value::List(mut items) = list else {
                    return Err(runtime(
                        line,
                        format!("append() expects a list, not {}", list.type_name()),
                    ));
                };
                items.push(item);
                Ok(Value::List(items))
            }
            Builtin::Sum => {
                let [list] = expect_args::<1>(builtin, args, line)?;
                let Value::List(items) = list else {
                    return Err(runtime(
                        line,
                        format!("sum() expects a list, not {}", list.type_name()),
                    ));
                };
                items
                    .iter()
                    .try_fold(Value::Int(0), |acc, item| binary(BinaryOp::Add, &acc, item, line))
            }
            Builtin::Min | Builtin::Max => {
                let items = match <[Value; 1]>::try_from(args) {
                    Ok([Value::List(items)]) => items,
                    Ok([single]) => vec![single],
                    Err(args) => args,
                };
                let mut iter = items.into_iter();
                let Some(mut best) = iter.next() else {
                    return Err(runtime(line, format!("{}() arg is an empty sequence", builtin.name())));
                };
                let wanted = if builtin == Builtin::Min {
                    BinaryOp::Lt
                } else {
                    BinaryOp::Gt
                };
                for item in iter {
                    if binary(wanted, &item, &best, line)?.is_truthy() {
                        best = item;
                    }
                }
                Ok(best)
            }
            Builtin::Abs => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                match value {
                    Value::Int(i) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| runtime(line, "integer overflow")),
                    Value::Float(x) => Ok(Value::Float(x.abs())),
                    other => Err(runtime(
                        line,
                        format!("bad operand type for abs(): '{}'", other.type_name()),
                    )),
                }
            }
            Builtin::Type => {
                let [value] = expect_args::<1>(builtin, args, line)?;
                Ok(Value::Str(value.type_name().to_owned()))
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn expect_args<const N: usize>(builtin: Builtin, args: Vec<Value>, line: usize) -> Exec<[Value; N]> {
    let given = args.len();
    <[Value; N]>::try_from(args).map_err(|_| {
        runtime(
            line,
            format!("{}() takes {N} argument(s) but {given} were given", builtin.name()),
        )
    })
}

fn expr_line(expr: &Expr) -> Option<usize> {
    match expr {
        Expr::Var { line, .. }
        | Expr::Index { line, .. }
        | Expr::Call { line, .. }
        | Expr::Unary { line, .. }
        | Expr::Binary { line, .. } => Some(*line),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_int(value: &Value, line: usize) -> Exec<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Float(x) if x.is_finite() && x.abs() < 9.2e18 => Ok(x.trunc() as i64),
        Value::Float(x) => Err(runtime(line, format!("cannot convert float {x} to int"))),
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| runtime(line, format!("invalid literal for int(): '{s}'"))),
        other => Err(runtime(
            line,
            format!("int() argument must be a number or str, not {}", other.type_name()),
        )),
    }
}

fn range(args: Vec<Value>, line: usize) -> Exec<Value> {
    let ints = args
        .iter()
        .map(|arg| match arg {
            Value::Int(i) => Ok(*i),
            other => Err(runtime(
                line,
                format!("range() expects int arguments, not {}", other.type_name()),
            )),
        })
        .collect::<Exec<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(runtime(
                line,
                format!("range() takes 1 to 3 arguments but {} were given", ints.len()),
            ))
        }
    };
    if step == 0 {
        return Err(runtime(line, "range() step must not be zero"));
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        values.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::List(values))
}

fn resolve_index(index: i64, len: usize, line: usize) -> Exec<usize> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + len_i } else { index };
    if (0..len_i).contains(&resolved) {
        usize::try_from(resolved).map_err(|_| runtime(line, "index out of range"))
    } else {
        Err(runtime(line, format!("index {index} out of range")))
    }
}

fn index_value(target: &Value, index: &Value, line: usize) -> Exec<Value> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => Ok(items[resolve_index(*i, items.len(), line)?].clone()),
        (Value::Map(entries), Value::Str(key)) => entries
            .get(key)
            .cloned()
            .ok_or_else(|| runtime(line, format!("key '{key}' not found"))),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = resolve_index(*i, chars.len(), line)?;
            Ok(Value::Str(chars[idx].to_string()))
        }
        (target, index) => Err(runtime(
            line,
            format!(
                "cannot index {} with {}",
                target.type_name(),
                index.type_name()
            ),
        )),
    }
}

fn index_mut<'v>(target: &'v mut Value, index: &Value, line: usize) -> Exec<&'v mut Value> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = resolve_index(*i, items.len(), line)?;
            Ok(&mut items[idx])
        }
        (Value::Map(entries), Value::Str(key)) => entries
            .get_mut(key)
            .ok_or_else(|| runtime(line, format!("key '{key}' not found"))),
        (target, index) => Err(runtime(
            line,
            format!(
                "cannot index {} with {}",
                target.type_name(),
                index.type_name()
            ),
        )),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, line: usize) -> Exec<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs.equals(rhs))),
        BinaryOp::NotEq => return Ok(Value::Bool(!lhs.equals(rhs))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            return compare(op, lhs, rhs, line)
        }
        _ => {}
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b, line),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) else {
                return Err(runtime(line, "unsupported numeric operands"));
            };
            float_arith(op, a, b, line)
        }
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == BinaryOp::Mul => {
            Ok(Value::Str(s.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items))
            if op == BinaryOp::Mul =>
        {
            let times = usize::try_from(*n).unwrap_or(0);
            Ok(Value::List(
                std::iter::repeat_with(|| items.iter().cloned())
                    .take(times)
                    .flatten()
                    .collect(),
            ))
        }
        _ => Err(runtime(
            line,
            format!(
                "unsupported operand types for {}: '{}' and '{}'",
                symbol(op),
                lhs.type_name(),
                rhs.type_name()
            ),
        )),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64, line: usize) -> Exec<Value> {
    let overflow = || runtime(line, "integer overflow");
    match op {
        BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        #[allow(clippy::cast_precision_loss)]
        BinaryOp::Div => {
            if b == 0 {
                Err(runtime(line, "division by zero"))
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(runtime(line, "modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        _ => Err(runtime(line, format!("unsupported operator {}", symbol(op)))),
    }
}

fn float_arith(op: BinaryOp, a: f64, b: f64, line: usize) -> Exec<Value> {
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div if b == 0.0 => Err(runtime(line, "division by zero")),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        BinaryOp::Rem if b == 0.0 => Err(runtime(line, "modulo by zero")),
        BinaryOp::Rem => {
            let r = a % b;
            Ok(Value::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }))
        }
        _ => Err(runtime(line, format!("unsupported operator {}", symbol(op)))),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value, line: usize) -> Exec<Value> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (as_f64(lhs), as_f64(rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(runtime(
                    line,
                    format!(
                        "'{}' not supported between '{}' and '{}'",
                        symbol(op),
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                ))
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    Ok(Value::Bool(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
    }
}
