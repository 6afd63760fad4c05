//! Read-only traversal over parsed scripts
//!
//! Override the `visit_*` hooks you care about and call the matching
//! `walk_*` function to keep descending.

use super::ast::*;

/// Visitor over a [`Script`].
pub trait Visitor {
    fn visit_script(&mut self, script: &Script) {
        walk_script(self, script);
    }

    fn visit_command(&mut self, command: &Command) {
        walk_command(self, command);
    }

    fn visit_simple_command(&mut self, command: &SimpleCommand) {
        walk_simple_command(self, command);
    }

    fn visit_assignment(&mut self, assignment: &Assignment) {
        walk_assignment(self, assignment);
    }

    fn visit_redirect(&mut self, redirect: &Redirect) {
        self.visit_word(&redirect.target);
    }

    fn visit_word(&mut self, word: &Word) {
        walk_word(self, word);
    }

    fn visit_arith(&mut self, expr: &ArithExpr) {
        walk_arith(self, expr);
    }
}

pub fn walk_script<V: Visitor + ?Sized>(v: &mut V, script: &Script) {
    walk_commands(v, &script.commands);
}

fn walk_commands<V: Visitor + ?Sized>(v: &mut V, commands: &[Command]) {
    for command in commands {
        v.visit_command(command);
    }
}

pub fn walk_command<V: Visitor + ?Sized>(v: &mut V, command: &Command) {
    match command {
        Command::Simple(cmd) => v.visit_simple_command(cmd),
        Command::Pipeline(pipeline) => walk_commands(v, &pipeline.commands),
        Command::List(list) => {
            v.visit_command(&list.first);
            for (_, cmd) in &list.rest {
                v.visit_command(cmd);
            }
        }
        Command::Compound(compound, redirects) => {
            walk_compound(v, compound);
            for redirect in redirects {
                v.visit_redirect(redirect);
            }
        }
        Command::Declaration(decl) => {
            for arg in &decl.args {
                match arg {
                    DeclArg::Flag(word) => v.visit_word(word),
                    DeclArg::Name(_) => {}
                    DeclArg::Assign(assignment) => v.visit_assignment(assignment),
                }
            }
        }
        Command::Arithmetic(expr) => v.visit_arith(expr),
    }
}

fn walk_compound<V: Visitor + ?Sized>(v: &mut V, compound: &CompoundCommand) {
    match compound {
        CompoundCommand::If(cmd) => {
            walk_commands(v, &cmd.condition);
            walk_commands(v, &cmd.then_branch);
            for (cond, body) in &cmd.elif_branches {
                walk_commands(v, cond);
                walk_commands(v, body);
            }
            if let Some(body) = &cmd.else_branch {
                walk_commands(v, body);
            }
        }
        CompoundCommand::While(cmd) | CompoundCommand::Until(cmd) => {
            walk_commands(v, &cmd.condition);
            walk_commands(v, &cmd.body);
        }
        CompoundCommand::For(cmd) => {
            for word in &cmd.words {
                v.visit_word(word);
            }
            walk_commands(v, &cmd.body);
        }
        CompoundCommand::ArithFor(cmd) => {
            for expr in [&cmd.init, &cmd.condition, &cmd.step].into_iter().flatten() {
                v.visit_arith(expr);
            }
            walk_commands(v, &cmd.body);
        }
        CompoundCommand::BraceGroup(body) | CompoundCommand::Subshell(body) => {
            walk_commands(v, body);
        }
    }
}

pub fn walk_simple_command<V: Visitor + ?Sized>(v: &mut V, command: &SimpleCommand) {
    for assignment in &command.assignments {
        v.visit_assignment(assignment);
    }
    if let Some(name) = &command.name {
        v.visit_word(name);
    }
    for arg in &command.args {
        v.visit_word(arg);
    }
    for redirect in &command.redirects {
        v.visit_redirect(redirect);
    }
}

pub fn walk_assignment<V: Visitor + ?Sized>(v: &mut V, assignment: &Assignment) {
    if let Some(index) = &assignment.index {
        v.visit_word(index);
    }
    match &assignment.value {
        AssignmentValue::Scalar(word) => v.visit_word(word),
        AssignmentValue::Array(elements) => {
            for element in elements {
                if let Some(key) = &element.key {
                    v.visit_word(key);
                }
                v.visit_word(&element.value);
            }
        }
    }
}

pub fn walk_word<V: Visitor + ?Sized>(v: &mut V, word: &Word) {
    for part in &word.parts {
        match part {
            WordPart::CommandSubstitution(script) => v.visit_script(script),
            WordPart::ArithmeticExpansion(expr) => v.visit_arith(expr),
            WordPart::ArrayAccess { index, .. } => v.visit_word(index),
            WordPart::Literal(_) | WordPart::Variable(_) | WordPart::Length(_) => {}
        }
    }
}

pub fn walk_arith<V: Visitor + ?Sized>(v: &mut V, expr: &ArithExpr) {
    match expr {
        ArithExpr::Word(word) => v.visit_word(word),
        ArithExpr::Paren(inner) => v.visit_arith(inner),
        ArithExpr::Unary { operand, .. } => v.visit_arith(operand),
        ArithExpr::Binary { left, right, .. } => {
            v.visit_arith(left);
            v.visit_arith(right);
        }
    }
}
