use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::ui;
use crate::App;

pub fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    hotkey_flag: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if app.should_quit {
            return Ok(());
        }

        app.check_hotkey(&hotkey_flag);
        app.drain_engine();
        app.poll_balance();
        app.drain_logs();

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with 100ms timeout (keeps TUI responsive)
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if app.confirm.is_some() {
                        handle_confirm_key(app, key);
                    } else {
                        handle_key(app, key);
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollUp => app.scroll_log_up(3),
                    MouseEventKind::ScrollDown => app.scroll_log_down(3),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => app.request_quit(),
        KeyCode::Esc => app.stop(),
        KeyCode::Char('s') | KeyCode::Char('S') => app.start_stop(),
        KeyCode::Char('m') | KeyCode::Char('M') => app.toggle_method(),
        KeyCode::Char('t') | KeyCode::Char('T') => app.cycle_target_window(),
        KeyCode::Char('r') | KeyCode::Char('R') => app.toggle_randomize(),
        KeyCode::Char('b') | KeyCode::Char('B') => app.toggle_skip_buy(),
        KeyCode::Char('x') | KeyCode::Char('X') => app.toggle_skip_max(),
        KeyCode::Char('d') | KeyCode::Char('D') => app.toggle_debug(),
        KeyCode::Char('v') | KeyCode::Char('V') => app.toggle_detail_view(),
        KeyCode::Char('c') | KeyCode::Char('C') => app.clear_details(),
        KeyCode::Char('l') | KeyCode::Char('L') => app.toggle_log(),
        _ => {}
    }
}

fn handle_confirm_key(app: &mut App, key: KeyEvent) {
    let Some(dialog) = app.confirm.as_mut() else { return };
    match key.code {
        KeyCode::Left | KeyCode::Right | KeyCode::Tab => dialog.toggle(),
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            app.confirm = None;
            app.quit();
        }
        KeyCode::Enter => {
            let yes = dialog.selected;
            app.confirm = None;
            if yes {
                app.quit();
            }
        }
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.confirm = None,
        _ => {}
    }
}
